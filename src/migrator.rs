use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_catalog_and_accounts::Migration),
            Box::new(m20240601_000002_create_coupon_tables::Migration),
            Box::new(m20240601_000003_create_cart_lines_table::Migration),
            Box::new(m20240601_000004_create_entitlements_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240601_000001_create_catalog_and_accounts {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_catalog_and_accounts"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CatalogItems::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CatalogItems::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(CatalogItems::Name).string().not_null())
                        .col(ColumnDef::new(CatalogItems::Kind).string_len(32).not_null())
                        .col(ColumnDef::new(CatalogItems::EventYear).integer().not_null())
                        .col(ColumnDef::new(CatalogItems::Amount).big_integer().not_null())
                        .col(ColumnDef::new(CatalogItems::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(CatalogItems::ContentRef).string().null())
                        .col(
                            ColumnDef::new(CatalogItems::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(CatalogItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CatalogItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_catalog_items_active_year")
                        .table(CatalogItems::Table)
                        .col(CatalogItems::Active)
                        .col(CatalogItems::EventYear)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Accounts::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Accounts::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Accounts::Email).string().not_null().unique_key())
                        .col(
                            ColumnDef::new(Accounts::EmailConfirmed)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Accounts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Accounts::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(CatalogItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum CatalogItems {
        Table,
        Id,
        Name,
        Kind,
        EventYear,
        Amount,
        Currency,
        ContentRef,
        Active,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Accounts {
        Table,
        Id,
        Email,
        EmailConfirmed,
        CreatedAt,
    }
}

mod m20240601_000002_create_coupon_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_coupon_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Coupons::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Coupons::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Coupons::Code).string().not_null().unique_key())
                        .col(ColumnDef::new(Coupons::DiscountKind).string_len(20).not_null())
                        .col(ColumnDef::new(Coupons::DiscountValue).big_integer().not_null())
                        .col(ColumnDef::new(Coupons::Currency).string_len(3).null())
                        .col(ColumnDef::new(Coupons::CatalogItemId).uuid().null())
                        .col(
                            ColumnDef::new(Coupons::ValidFrom)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::ValidUntil)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Coupons::MaxRedemptions).integer().null())
                        .col(
                            ColumnDef::new(Coupons::TimesRedeemed)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Coupons::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Coupons::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Coupons::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CouponRedemptions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CouponRedemptions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CouponRedemptions::CouponId).uuid().not_null())
                        .col(
                            ColumnDef::new(CouponRedemptions::AuthorizationId)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(CouponRedemptions::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_coupon_redemptions_coupon")
                                .from(CouponRedemptions::Table, CouponRedemptions::CouponId)
                                .to(Coupons::Table, Coupons::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_coupon_redemptions_coupon_id")
                        .table(CouponRedemptions::Table)
                        .col(CouponRedemptions::CouponId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CouponRedemptions::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Coupons::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Coupons {
        Table,
        Id,
        Code,
        DiscountKind,
        DiscountValue,
        Currency,
        CatalogItemId,
        ValidFrom,
        ValidUntil,
        MaxRedemptions,
        TimesRedeemed,
        Active,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum CouponRedemptions {
        Table,
        Id,
        CouponId,
        AuthorizationId,
        CreatedAt,
    }
}

mod m20240601_000003_create_cart_lines_table {

    use super::m20240601_000001_create_catalog_and_accounts::CatalogItems;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000003_create_cart_lines_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CartLines::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(CartLines::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(CartLines::OwnerKind).string_len(16).not_null())
                        .col(ColumnDef::new(CartLines::OwnerRef).string().not_null())
                        .col(ColumnDef::new(CartLines::CatalogItemId).uuid().not_null())
                        .col(
                            ColumnDef::new(CartLines::Quantity)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(CartLines::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_cart_lines_catalog_item")
                                .from(CartLines::Table, CartLines::CatalogItemId)
                                .to(CatalogItems::Table, CatalogItems::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            // Concurrent adds converge on this index
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_cart_lines_owner_item")
                        .table(CartLines::Table)
                        .col(CartLines::OwnerKind)
                        .col(CartLines::OwnerRef)
                        .col(CartLines::CatalogItemId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CartLines::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CartLines {
        Table,
        Id,
        OwnerKind,
        OwnerRef,
        CatalogItemId,
        Quantity,
        CreatedAt,
    }
}

mod m20240601_000004_create_entitlements_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000004_create_entitlements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Entitlements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Entitlements::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Entitlements::IdentityId).uuid().not_null())
                        .col(ColumnDef::new(Entitlements::CatalogItemId).uuid().null())
                        .col(ColumnDef::new(Entitlements::EventYear).integer().not_null())
                        .col(ColumnDef::new(Entitlements::ScopeKey).string().not_null())
                        .col(ColumnDef::new(Entitlements::AuthorizationId).string().null())
                        .col(ColumnDef::new(Entitlements::CouponCode).string().null())
                        .col(
                            ColumnDef::new(Entitlements::DiscountApplied)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Entitlements::GrantedBy).uuid().null())
                        .col(
                            ColumnDef::new(Entitlements::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Idempotency key for confirmation and manual grants
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_entitlements_identity_scope_year")
                        .table(Entitlements::Table)
                        .col(Entitlements::IdentityId)
                        .col(Entitlements::ScopeKey)
                        .col(Entitlements::EventYear)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_entitlements_authorization_id")
                        .table(Entitlements::Table)
                        .col(Entitlements::AuthorizationId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Entitlements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Entitlements {
        Table,
        Id,
        IdentityId,
        CatalogItemId,
        EventYear,
        ScopeKey,
        AuthorizationId,
        CouponCode,
        DiscountApplied,
        GrantedBy,
        CreatedAt,
    }
}
