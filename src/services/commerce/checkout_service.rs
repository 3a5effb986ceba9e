use crate::{
    auth::CurrentIdentity,
    entities::commerce::CatalogItemModel,
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{NewAuthorization, PaymentGateway},
    services::commerce::{
        cart_service::CartOwner,
        catalog_service::require_active_on,
        coupon_service::{CouponEvaluation, CouponService},
        identity_service::normalize_email,
        snapshot::CheckoutSnapshot,
    },
};
use metrics::counter;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

/// Input for starting a checkout
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub item_ids: Vec<Uuid>,
    #[validate(length(max = 64))]
    pub coupon_code: Option<String>,
    /// Required when the caller is not signed in
    #[validate(email)]
    pub guest_email: Option<String>,
}

/// Result of a checkout: what the client needs to complete payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub client_handle: String,
    pub authorization_id: String,
    /// Amount to charge, minor units
    pub amount: i64,
    pub discount: i64,
}

/// Priced cart: the validated items plus their shared currency and subtotal.
#[derive(Debug, Clone)]
struct PricedItems {
    items: Vec<CatalogItemModel>,
    currency: String,
    subtotal: i64,
}

impl PricedItems {
    fn ids(&self) -> Vec<Uuid> {
        self.items.iter().map(|item| item.id).collect()
    }
}

/// Collapses duplicates while keeping first-seen order.
pub fn dedupe_item_ids(item_ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = HashSet::with_capacity(item_ids.len());
    item_ids
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Turns a cart plus an optional coupon into a payment authorization.
///
/// Checkout never records entitlements. It only writes the snapshot the
/// entitlement recorder later reads back from the gateway.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
    coupons: CouponService,
    event_sender: Arc<EventSender>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        coupons: CouponService,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            gateway,
            coupons,
            event_sender,
        }
    }

    async fn price(&self, item_ids: &[Uuid]) -> Result<PricedItems, ServiceError> {
        let ids = dedupe_item_ids(item_ids);
        if ids.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let items = require_active_on(&*self.db, &ids).await?;

        let currency = items
            .first()
            .map(|item| item.currency.to_uppercase())
            .ok_or(ServiceError::EmptyCart)?;
        if let Some(other) = items
            .iter()
            .find(|item| !item.currency.eq_ignore_ascii_case(&currency))
        {
            return Err(ServiceError::CurrencyMismatch(format!(
                "cart mixes {} and {}",
                currency,
                other.currency.to_uppercase()
            )));
        }

        let subtotal = items
            .iter()
            .try_fold(0i64, |acc, item| acc.checked_add(item.amount))
            .ok_or_else(|| ServiceError::ValidationError("Cart subtotal overflows".into()))?;

        Ok(PricedItems {
            items,
            currency,
            subtotal,
        })
    }

    /// Prices the cart and evaluates `code` against it without side effects.
    #[instrument(skip(self, item_ids))]
    pub async fn preview_coupon(
        &self,
        code: &str,
        item_ids: &[Uuid],
    ) -> Result<CouponEvaluation, ServiceError> {
        let priced = self.price(item_ids).await?;
        self.coupons
            .evaluate(code, priced.subtotal, &priced.ids(), &priced.currency)
            .await
    }

    /// Creates a payment authorization for the cart.
    ///
    /// The buyer email (caller's, else `guest_email`) is resolved before any
    /// gateway call. Gateway errors are returned as-is and never retried here.
    #[instrument(skip(self, request, caller), fields(items = request.item_ids.len()))]
    pub async fn create_checkout(
        &self,
        request: CheckoutRequest,
        caller: Option<&CurrentIdentity>,
        cart_owner: Option<CartOwner>,
    ) -> Result<CheckoutResponse, ServiceError> {
        if request.item_ids.is_empty() {
            return Err(ServiceError::EmptyCart);
        }

        let email = caller
            .and_then(|identity| identity.email.as_deref())
            .or(request.guest_email.as_deref())
            .map(normalize_email)
            .filter(|email| !email.is_empty())
            .ok_or(ServiceError::IdentityRequired)?;

        let priced = self.price(&request.item_ids).await?;
        let item_ids = priced.ids();

        let evaluation = match request
            .coupon_code
            .as_deref()
            .filter(|code| !code.trim().is_empty())
        {
            Some(code) => Some(
                self.coupons
                    .evaluate(code, priced.subtotal, &item_ids, &priced.currency)
                    .await?,
            ),
            None => None,
        };
        let applied = evaluation.as_ref().filter(|eval| eval.valid);
        let discount = applied.map_or(0, |eval| eval.discount_amount);
        let coupon_code = applied.and_then(|eval| eval.applied_code().map(str::to_string));
        let total = (priced.subtotal - discount).max(0);

        let customer = match self.gateway.find_customer(&email).await? {
            Some(existing) => existing,
            None => self.gateway.create_customer(&email).await?,
        };

        let snapshot = CheckoutSnapshot {
            item_ids,
            coupon_code: coupon_code.clone(),
            discount_amount: discount,
            customer_email: email,
            identity_id: caller.map(|identity| identity.id),
            cart_owner,
        };

        let authorization = self
            .gateway
            .create_authorization(NewAuthorization {
                amount: total,
                currency: priced.currency.clone(),
                customer_id: customer.id,
                metadata: snapshot.to_metadata(),
            })
            .await?;

        counter!("storefront.checkout.created", 1);
        if discount > 0 {
            counter!("storefront.checkout.discounted", 1);
        }
        self.event_sender
            .send_or_log(Event::CheckoutCreated {
                authorization_id: authorization.id.clone(),
                amount: total,
                discount,
                coupon_code,
            })
            .await;

        info!(
            authorization_id = %authorization.id,
            gateway = self.gateway.name(),
            subtotal = priced.subtotal,
            discount,
            total,
            currency = %priced.currency,
            "Checkout created"
        );

        Ok(CheckoutResponse {
            client_handle: authorization.client_handle,
            authorization_id: authorization.id,
            amount: total,
            discount,
        })
    }
}
