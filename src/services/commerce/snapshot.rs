//! Typed checkout snapshot carried in authorization metadata.
//!
//! The snapshot is the only record the entitlement recorder trusts at
//! confirmation time: the item list, coupon and discount are read back from
//! here and never recomputed from the live catalog.

use super::cart_service::CartOwner;
use crate::gateway::Metadata;
use thiserror::Error;
use uuid::Uuid;

pub const SNAPSHOT_VERSION: u32 = 1;

const KEY_VERSION: &str = "snapshot_version";
const KEY_ITEM_IDS: &str = "item_ids";
const KEY_COUPON_CODE: &str = "coupon_code";
const KEY_DISCOUNT: &str = "discount_amount";
const KEY_EMAIL: &str = "customer_email";
const KEY_IDENTITY: &str = "identity_id";
const KEY_CART_OWNER: &str = "cart_owner";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("unsupported snapshot version `{0}`")]
    UnsupportedVersion(String),

    #[error("field `{field}` has invalid value `{value}`")]
    InvalidField { field: &'static str, value: String },

    #[error("snapshot lists no items")]
    EmptyItems,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSnapshot {
    pub item_ids: Vec<Uuid>,
    pub coupon_code: Option<String>,
    /// Discount applied at checkout, minor units
    pub discount_amount: i64,
    pub customer_email: String,
    /// Identity known at checkout time, if the buyer was signed in
    pub identity_id: Option<Uuid>,
    /// Cart to clear once the purchase is recorded
    pub cart_owner: Option<CartOwner>,
}

impl CheckoutSnapshot {
    pub fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(KEY_VERSION.into(), SNAPSHOT_VERSION.to_string());
        metadata.insert(
            KEY_ITEM_IDS.into(),
            self.item_ids
                .iter()
                .map(Uuid::to_string)
                .collect::<Vec<_>>()
                .join(","),
        );
        if let Some(code) = &self.coupon_code {
            metadata.insert(KEY_COUPON_CODE.into(), code.clone());
        }
        metadata.insert(KEY_DISCOUNT.into(), self.discount_amount.to_string());
        metadata.insert(KEY_EMAIL.into(), self.customer_email.clone());
        if let Some(identity) = self.identity_id {
            metadata.insert(KEY_IDENTITY.into(), identity.to_string());
        }
        if let Some(owner) = &self.cart_owner {
            metadata.insert(KEY_CART_OWNER.into(), owner.encode());
        }
        metadata
    }

    /// Strict decode: required fields must be present and well-formed.
    pub fn from_metadata(metadata: &Metadata) -> Result<Self, SnapshotError> {
        let version = required(metadata, KEY_VERSION)?;
        if version.parse::<u32>().ok() != Some(SNAPSHOT_VERSION) {
            return Err(SnapshotError::UnsupportedVersion(version.to_string()));
        }

        let raw_items = required(metadata, KEY_ITEM_IDS)?;
        let item_ids = raw_items
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                Uuid::parse_str(s).map_err(|_| SnapshotError::InvalidField {
                    field: KEY_ITEM_IDS,
                    value: s.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if item_ids.is_empty() {
            return Err(SnapshotError::EmptyItems);
        }

        let raw_discount = required(metadata, KEY_DISCOUNT)?;
        let discount_amount = raw_discount
            .parse::<i64>()
            .ok()
            .filter(|d| *d >= 0)
            .ok_or_else(|| SnapshotError::InvalidField {
                field: KEY_DISCOUNT,
                value: raw_discount.to_string(),
            })?;

        let customer_email = required(metadata, KEY_EMAIL)?.to_string();

        let coupon_code = optional(metadata, KEY_COUPON_CODE).map(str::to_string);
        if coupon_code.is_none() && discount_amount > 0 {
            return Err(SnapshotError::MissingField(KEY_COUPON_CODE));
        }

        let identity_id = optional(metadata, KEY_IDENTITY)
            .map(|raw| {
                Uuid::parse_str(raw).map_err(|_| SnapshotError::InvalidField {
                    field: KEY_IDENTITY,
                    value: raw.to_string(),
                })
            })
            .transpose()?;

        let cart_owner = optional(metadata, KEY_CART_OWNER)
            .map(|raw| {
                CartOwner::parse(raw).ok_or_else(|| SnapshotError::InvalidField {
                    field: KEY_CART_OWNER,
                    value: raw.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            item_ids,
            coupon_code,
            discount_amount,
            customer_email,
            identity_id,
            cart_owner,
        })
    }
}

fn optional<'a>(metadata: &'a Metadata, key: &'static str) -> Option<&'a str> {
    metadata
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn required<'a>(metadata: &'a Metadata, key: &'static str) -> Result<&'a str, SnapshotError> {
    optional(metadata, key).ok_or(SnapshotError::MissingField(key))
}
