use crate::{
    auth::{AdminContext, CurrentIdentity},
    entities::commerce::{
        entitlement::{self, scope_key},
        CatalogItemModel, Entitlement, EntitlementModel, BUNDLE_SCOPE_KEY,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{AuthorizationStatus, PaymentGateway},
    notifications::{EmailTemplate, Mailer, TemplateVariables},
    services::commerce::{
        cart_service::CartService,
        catalog_service::find_many_on,
        coupon_service::{CouponService, RedemptionOutcome},
        identity_service::IdentityService,
        snapshot::CheckoutSnapshot,
    },
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::OnConflict, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    #[validate(length(min = 1, max = 255))]
    pub authorization_id: String,
    #[serde(default)]
    pub create_account: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmResponse {
    pub success: bool,
    pub account_created: bool,
}

/// What a manual grant unlocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GrantTarget {
    #[serde(rename_all = "camelCase")]
    Item { item_id: Uuid },
    #[serde(rename_all = "camelCase")]
    Bundle { event_year: i32 },
}

/// Result of an idempotent entitlement upsert
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantOutcome {
    pub entitlement: EntitlementModel,
    /// `false` when the entitlement already existed
    pub created: bool,
}

/// Row to upsert, before the unique key is applied
#[derive(Debug, Clone)]
struct NewEntitlement {
    identity_id: Uuid,
    catalog_item_id: Option<Uuid>,
    event_year: i32,
    authorization_id: Option<String>,
    coupon_code: Option<String>,
    discount_applied: i64,
    granted_by: Option<Uuid>,
}

impl NewEntitlement {
    /// Purchase of `item`; year bundles become a bundle entitlement.
    fn for_item(identity_id: Uuid, item: &CatalogItemModel) -> Self {
        Self {
            identity_id,
            catalog_item_id: if item.kind.grants_bundle() {
                None
            } else {
                Some(item.id)
            },
            event_year: item.event_year,
            authorization_id: None,
            coupon_code: None,
            discount_applied: 0,
            granted_by: None,
        }
    }
}

/// Inserts unless `(identity, scope_key, event_year)` exists, then reads the key back.
///
/// More than one row for the key means the unique index is missing and is
/// reported as [`ServiceError::EntitlementConflict`].
async fn upsert_entitlement<C: ConnectionTrait>(
    conn: &C,
    new: NewEntitlement,
) -> Result<GrantOutcome, ServiceError> {
    let key = scope_key(new.catalog_item_id);
    let row = entitlement::ActiveModel {
        id: Set(Uuid::new_v4()),
        identity_id: Set(new.identity_id),
        catalog_item_id: Set(new.catalog_item_id),
        event_year: Set(new.event_year),
        scope_key: Set(key.clone()),
        authorization_id: Set(new.authorization_id),
        coupon_code: Set(new.coupon_code),
        discount_applied: Set(new.discount_applied),
        granted_by: Set(new.granted_by),
        created_at: Set(Utc::now()),
    };

    let inserted = Entitlement::insert(row)
        .on_conflict(
            OnConflict::columns([
                entitlement::Column::IdentityId,
                entitlement::Column::ScopeKey,
                entitlement::Column::EventYear,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    let mut rows = Entitlement::find()
        .filter(entitlement::Column::IdentityId.eq(new.identity_id))
        .filter(entitlement::Column::ScopeKey.eq(key.as_str()))
        .filter(entitlement::Column::EventYear.eq(new.event_year))
        .all(conn)
        .await?;

    if rows.len() > 1 {
        return Err(ServiceError::EntitlementConflict(format!(
            "{} rows for identity {} scope {} year {}",
            rows.len(),
            new.identity_id,
            key,
            new.event_year
        )));
    }
    let entitlement = rows.pop().ok_or_else(|| {
        ServiceError::InternalError(format!(
            "Entitlement for scope {} year {} missing after upsert",
            key, new.event_year
        ))
    })?;

    Ok(GrantOutcome {
        entitlement,
        created: inserted > 0,
    })
}

/// Converts succeeded authorizations into entitlements and answers access
/// questions.
///
/// Confirmation is safe to repeat: rows converge on the entitlement unique
/// index and the coupon is counted once per authorization.
#[derive(Clone)]
pub struct EntitlementService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    coupons: CouponService,
    identity: IdentityService,
    carts: CartService,
    mailer: Arc<dyn Mailer>,
    event_sender: Arc<EventSender>,
}

impl EntitlementService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        coupons: CouponService,
        identity: IdentityService,
        carts: CartService,
        mailer: Arc<dyn Mailer>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            gateway,
            coupons,
            identity,
            carts,
            mailer,
            event_sender,
        }
    }

    /// Records the entitlements paid for by `authorization_id`.
    ///
    /// # Returns
    ///
    /// * `Ok(ConfirmResponse)` - Every item is recorded
    /// * `Err(ServiceError::NotSucceeded)` - Payment is not (yet) succeeded
    /// * `Err(ServiceError::EntitlementIncomplete)` - Some items failed; retry
    #[instrument(skip(self, caller), fields(authorization_id = %request.authorization_id))]
    pub async fn confirm(
        &self,
        request: ConfirmRequest,
        caller: Option<&CurrentIdentity>,
    ) -> Result<ConfirmResponse, ServiceError> {
        let authorization = self
            .gateway
            .retrieve_authorization(&request.authorization_id)
            .await?;

        if authorization.status != AuthorizationStatus::Succeeded {
            counter!("storefront.confirm.not_succeeded", 1);
            return Err(ServiceError::NotSucceeded {
                authorization_id: authorization.id,
                status: authorization.status.to_string(),
            });
        }

        let snapshot = CheckoutSnapshot::from_metadata(&authorization.metadata)?;
        let resolved = self
            .identity
            .resolve(&snapshot, caller, request.create_account)
            .await?;

        // Items are looked up in any active state: the purchase was priced
        // at checkout and deactivation afterwards does not void it.
        let catalog = find_many_on(&*self.db, &snapshot.item_ids).await?;

        let mut created = Vec::new();
        let mut failed = 0usize;
        for item_id in &snapshot.item_ids {
            let Some(item) = catalog.get(item_id) else {
                failed += 1;
                error!(item_id = %item_id, "Purchased catalog item no longer exists");
                continue;
            };

            let new = NewEntitlement {
                authorization_id: Some(authorization.id.clone()),
                coupon_code: snapshot.coupon_code.clone(),
                discount_applied: snapshot.discount_amount,
                ..NewEntitlement::for_item(resolved.identity_id, item)
            };
            match upsert_entitlement(&*self.db, new).await {
                Ok(outcome) if outcome.created => created.push(outcome.entitlement),
                Ok(_) => {}
                Err(e) => {
                    failed += 1;
                    error!(item_id = %item_id, error = %e, "Failed to record entitlement");
                }
            }
        }

        if let Some(code) = &snapshot.coupon_code {
            if self.coupons.record_redemption(code, &authorization.id).await?
                == RedemptionOutcome::UnknownCoupon
            {
                warn!(code = %code, "Snapshot coupon could not be counted");
            }
        }

        for entitlement in &created {
            self.event_sender
                .send_or_log(Event::EntitlementGranted {
                    entitlement_id: entitlement.id,
                    identity_id: entitlement.identity_id,
                    catalog_item_id: entitlement.catalog_item_id,
                    event_year: entitlement.event_year,
                    authorization_id: entitlement.authorization_id.clone(),
                })
                .await;
        }
        counter!("storefront.entitlements.granted", created.len() as u64);

        if failed > 0 {
            counter!("storefront.confirm.incomplete", 1);
            return Err(ServiceError::EntitlementIncomplete {
                failed,
                total: snapshot.item_ids.len(),
            });
        }

        if let Some(owner) = &snapshot.cart_owner {
            if let Err(e) = self.carts.remove_items(owner, &snapshot.item_ids).await {
                warn!(owner = %owner, error = %e, "Failed to clear purchased cart lines");
            }
        }

        if !created.is_empty() {
            self.send_confirmation(&snapshot, &authorization.id, created.len())
                .await;
        }

        counter!("storefront.confirm.completed", 1);
        self.event_sender
            .send_or_log(Event::PurchaseConfirmed {
                authorization_id: authorization.id.clone(),
                identity_id: resolved.identity_id,
                granted: created.len(),
            })
            .await;
        info!(
            identity_id = %resolved.identity_id,
            granted = created.len(),
            account_created = resolved.account_created,
            "Purchase confirmed"
        );

        Ok(ConfirmResponse {
            success: true,
            account_created: resolved.account_created,
        })
    }

    async fn send_confirmation(
        &self,
        snapshot: &CheckoutSnapshot,
        authorization_id: &str,
        granted: usize,
    ) {
        let mut variables = TemplateVariables::new();
        variables.insert("authorization_id".into(), authorization_id.to_string());
        variables.insert("granted".into(), granted.to_string());
        variables.insert("discount_amount".into(), snapshot.discount_amount.to_string());
        if let Some(code) = &snapshot.coupon_code {
            variables.insert("coupon_code".into(), code.clone());
        }

        if let Err(e) = self
            .mailer
            .send(
                EmailTemplate::PurchaseConfirmation,
                &snapshot.customer_email,
                variables,
            )
            .await
        {
            warn!(authorization_id, error = %e, "Failed to send purchase confirmation");
        }
    }

    /// Whether `identity_id` may open `item_id`: a direct entitlement for the
    /// item, or a bundle for its year when the kind is covered by bundles.
    #[instrument(skip(self))]
    pub async fn can_access(&self, identity_id: Uuid, item_id: Uuid) -> Result<bool, ServiceError> {
        let catalog = find_many_on(&*self.db, &[item_id]).await?;
        let item = catalog
            .get(&item_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Catalog item {} not found", item_id)))?;

        let mut scopes = vec![item.id.to_string()];
        if item.kind.covered_by_bundle() {
            scopes.push(BUNDLE_SCOPE_KEY.to_string());
        }

        let found = Entitlement::find()
            .filter(entitlement::Column::IdentityId.eq(identity_id))
            .filter(entitlement::Column::EventYear.eq(item.event_year))
            .filter(entitlement::Column::ScopeKey.is_in(scopes))
            .one(&*self.db)
            .await?;
        Ok(found.is_some())
    }

    pub async fn list_for_identity(
        &self,
        identity_id: Uuid,
    ) -> Result<Vec<EntitlementModel>, ServiceError> {
        Ok(Entitlement::find()
            .filter(entitlement::Column::IdentityId.eq(identity_id))
            .order_by_desc(entitlement::Column::EventYear)
            .order_by_asc(entitlement::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Grants an entitlement without a payment. Repeating a grant is a no-op.
    #[instrument(skip(self, admin), fields(admin_id = %admin.admin_id()))]
    pub async fn grant_manual(
        &self,
        admin: &AdminContext,
        identity_id: Uuid,
        target: GrantTarget,
    ) -> Result<GrantOutcome, ServiceError> {
        let base = match target {
            GrantTarget::Item { item_id } => {
                let catalog = find_many_on(&*self.db, &[item_id]).await?;
                let item = catalog.get(&item_id).ok_or_else(|| {
                    ServiceError::NotFound(format!("Catalog item {} not found", item_id))
                })?;
                NewEntitlement::for_item(identity_id, item)
            }
            GrantTarget::Bundle { event_year } => NewEntitlement {
                identity_id,
                catalog_item_id: None,
                event_year,
                authorization_id: None,
                coupon_code: None,
                discount_applied: 0,
                granted_by: None,
            },
        };

        let outcome = upsert_entitlement(
            &*self.db,
            NewEntitlement {
                granted_by: Some(admin.admin_id()),
                ..base
            },
        )
        .await?;

        if outcome.created {
            counter!("storefront.entitlements.manual_grants", 1);
            self.event_sender
                .send_or_log(Event::EntitlementGranted {
                    entitlement_id: outcome.entitlement.id,
                    identity_id,
                    catalog_item_id: outcome.entitlement.catalog_item_id,
                    event_year: outcome.entitlement.event_year,
                    authorization_id: None,
                })
                .await;
            info!(entitlement_id = %outcome.entitlement.id, "Manual entitlement granted");
        }
        Ok(outcome)
    }

    #[instrument(skip(self, admin), fields(admin_id = %admin.admin_id()))]
    pub async fn revoke(
        &self,
        admin: &AdminContext,
        entitlement_id: Uuid,
    ) -> Result<(), ServiceError> {
        let result = Entitlement::delete_by_id(entitlement_id)
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Entitlement {} not found",
                entitlement_id
            )));
        }

        counter!("storefront.entitlements.revoked", 1);
        self.event_sender
            .send_or_log(Event::EntitlementRevoked {
                entitlement_id,
                revoked_by: admin.admin_id(),
            })
            .await;
        Ok(())
    }
}
