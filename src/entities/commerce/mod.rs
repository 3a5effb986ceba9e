//! Storefront entities
pub mod account;
pub mod cart_line;
pub mod catalog_item;
pub mod coupon;
pub mod coupon_redemption;
pub mod entitlement;

// Re-export entities
pub use account::{Entity as Account, Model as AccountModel};
pub use cart_line::{CartOwnerKind, Entity as CartLine, Model as CartLineModel};
pub use catalog_item::{Entity as CatalogItem, ItemKind, Model as CatalogItemModel};
pub use coupon::{DiscountKind, Entity as Coupon, Model as CouponModel};
pub use coupon_redemption::{Entity as CouponRedemption, Model as CouponRedemptionModel};
pub use entitlement::{Entity as Entitlement, Model as EntitlementModel, BUNDLE_SCOPE_KEY};
