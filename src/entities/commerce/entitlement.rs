use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `scope_key` value for whole-year bundle entitlements.
pub const BUNDLE_SCOPE_KEY: &str = "bundle";

/// Entitlement entity.
///
/// Unique on `(identity_id, scope_key, event_year)`. `scope_key` mirrors
/// `catalog_item_id` (or [`BUNDLE_SCOPE_KEY`] when it is null) so the bundle
/// row participates in the unique index.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "entitlements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub identity_id: Uuid,
    /// `None` for a whole-year bundle
    #[sea_orm(nullable)]
    pub catalog_item_id: Option<Uuid>,
    pub event_year: i32,
    pub scope_key: String,
    /// Authorization that paid for this entitlement; `None` for manual grants
    #[sea_orm(nullable)]
    pub authorization_id: Option<String>,
    #[sea_orm(nullable)]
    pub coupon_code: Option<String>,
    pub discount_applied: i64,
    /// Admin who granted this manually
    #[sea_orm(nullable)]
    pub granted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::catalog_item::Entity",
        from = "Column::CatalogItemId",
        to = "super::catalog_item::Column::Id"
    )]
    CatalogItem,
    #[sea_orm(
        belongs_to = "super::account::Entity",
        from = "Column::IdentityId",
        to = "super::account::Column::Id"
    )]
    Account,
}

impl Related<super::catalog_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CatalogItem.def()
    }
}

impl Related<super::account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Account.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_bundle(&self) -> bool {
        self.catalog_item_id.is_none()
    }
}

/// Unique-index key for an entitlement target.
pub fn scope_key(catalog_item_id: Option<Uuid>) -> String {
    catalog_item_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| BUNDLE_SCOPE_KEY.to_string())
}
