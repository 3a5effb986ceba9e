//! Payment gateway boundary.
//!
//! The gateway is the sole source of truth for payment state. Checkout creates
//! authorizations through it and the entitlement recorder only trusts what
//! [`PaymentGateway::retrieve_authorization`] reports.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod in_memory;
pub mod stripe;

pub use in_memory::InMemoryGateway;
pub use stripe::StripeGateway;

/// Free-form string metadata attached to an authorization.
pub type Metadata = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Payment provider unavailable: {0}")]
    Unavailable(String),

    #[error("Payment provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Payment provider has no record of {0}")]
    NotFound(String),

    #[error("Unexpected payment provider response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCustomer {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    Pending,
    Succeeded,
    Failed,
}

impl AuthorizationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct NewAuthorization {
    /// Amount in minor currency units
    pub amount: i64,
    pub currency: String,
    pub customer_id: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentAuthorization {
    pub id: String,
    /// Opaque handle the client uses to complete payment
    pub client_handle: String,
    pub amount: i64,
    pub currency: String,
    pub status: AuthorizationStatus,
    pub metadata: Metadata,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    async fn find_customer(&self, email: &str) -> Result<Option<GatewayCustomer>, GatewayError>;

    async fn create_customer(&self, email: &str) -> Result<GatewayCustomer, GatewayError>;

    async fn create_authorization(
        &self,
        request: NewAuthorization,
    ) -> Result<PaymentAuthorization, GatewayError>;

    async fn retrieve_authorization(&self, id: &str)
        -> Result<PaymentAuthorization, GatewayError>;
}
