pub mod commerce;
pub mod common;
pub mod payment_webhooks;

use crate::{
    db::DbPool,
    events::EventSender,
    gateway::PaymentGateway,
    notifications::Mailer,
    services::commerce::{
        CartService, CatalogService, CheckoutService, CouponService, DbAccountDirectory,
        EntitlementService, IdentityService,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub cart: Arc<CartService>,
    pub coupons: Arc<CouponService>,
    pub checkout: Arc<CheckoutService>,
    pub entitlements: Arc<EntitlementService>,
}

impl AppServices {
    /// Wires every service over one pool, gateway, mailer and event channel.
    pub fn new(
        db_pool: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        let catalog = CatalogService::new(db_pool.clone());
        let cart = CartService::new(db_pool.clone(), event_sender.clone());
        let coupons = CouponService::new(db_pool.clone(), event_sender.clone());
        let identity = IdentityService::new(
            Arc::new(DbAccountDirectory::new(db_pool.clone())),
            mailer.clone(),
            event_sender.clone(),
        );
        let checkout = CheckoutService::new(
            db_pool.clone(),
            gateway.clone(),
            coupons.clone(),
            event_sender.clone(),
        );
        let entitlements = EntitlementService::new(
            db_pool,
            gateway,
            coupons.clone(),
            identity,
            cart.clone(),
            mailer,
            event_sender,
        );

        Self {
            catalog: Arc::new(catalog),
            cart: Arc::new(cart),
            coupons: Arc::new(coupons),
            checkout: Arc::new(checkout),
            entitlements: Arc::new(entitlements),
        }
    }
}
