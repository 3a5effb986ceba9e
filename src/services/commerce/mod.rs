//! Checkout and entitlement resolution services
pub mod cart_service;
pub mod catalog_service;
pub mod checkout_service;
pub mod coupon_service;
pub mod entitlement_service;
pub mod identity_service;
pub mod snapshot;

pub use cart_service::{CartOwner, CartService, CartView};
pub use catalog_service::CatalogService;
pub use checkout_service::{CheckoutRequest, CheckoutResponse, CheckoutService};
pub use coupon_service::{CouponEvaluation, CouponRejection, CouponService, RedemptionOutcome};
pub use entitlement_service::{
    ConfirmRequest, ConfirmResponse, EntitlementService, GrantOutcome, GrantTarget,
};
pub use identity_service::{AccountDirectory, DbAccountDirectory, IdentityService};
pub use snapshot::{CheckoutSnapshot, SnapshotError};
