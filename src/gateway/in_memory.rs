use super::{
    AuthorizationStatus, GatewayCustomer, GatewayError, NewAuthorization, PaymentAuthorization,
    PaymentGateway,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Process-local gateway for development and tests.
///
/// Authorizations start `pending`; tests settle them with
/// [`InMemoryGateway::mark_succeeded`] or [`InMemoryGateway::mark_failed`].
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    customers: RwLock<HashMap<String, GatewayCustomer>>,
    authorizations: RwLock<HashMap<String, PaymentAuthorization>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a provider outage: every call fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of gateway calls made, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn customer_count(&self) -> usize {
        self.customers.read().await.len()
    }

    pub async fn authorization(&self, id: &str) -> Option<PaymentAuthorization> {
        self.authorizations.read().await.get(id).cloned()
    }

    pub async fn mark_succeeded(&self, id: &str) -> Result<(), GatewayError> {
        self.set_status(id, AuthorizationStatus::Succeeded).await
    }

    pub async fn mark_failed(&self, id: &str) -> Result<(), GatewayError> {
        self.set_status(id, AuthorizationStatus::Failed).await
    }

    async fn set_status(&self, id: &str, status: AuthorizationStatus) -> Result<(), GatewayError> {
        let mut authorizations = self.authorizations.write().await;
        let authorization = authorizations
            .get_mut(id)
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;
        authorization.status = status;
        Ok(())
    }

    fn enter(&self) -> Result<(), GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable(
                "in-memory gateway is offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    fn name(&self) -> &'static str {
        "in-memory"
    }

    async fn find_customer(&self, email: &str) -> Result<Option<GatewayCustomer>, GatewayError> {
        self.enter()?;
        Ok(self
            .customers
            .read()
            .await
            .get(&email.to_ascii_lowercase())
            .cloned())
    }

    async fn create_customer(&self, email: &str) -> Result<GatewayCustomer, GatewayError> {
        self.enter()?;
        let customer = GatewayCustomer {
            id: format!("cus_{}", Uuid::new_v4().simple()),
            email: email.to_string(),
        };
        self.customers
            .write()
            .await
            .insert(email.to_ascii_lowercase(), customer.clone());
        Ok(customer)
    }

    async fn create_authorization(
        &self,
        request: NewAuthorization,
    ) -> Result<PaymentAuthorization, GatewayError> {
        self.enter()?;
        if request.amount < 0 {
            return Err(GatewayError::Rejected {
                status: 400,
                message: "amount must be non-negative".to_string(),
            });
        }
        let id = format!("pi_{}", Uuid::new_v4().simple());
        let authorization = PaymentAuthorization {
            client_handle: format!("{}_secret_{}", id, Uuid::new_v4().simple()),
            id: id.clone(),
            amount: request.amount,
            currency: request.currency,
            status: AuthorizationStatus::Pending,
            metadata: request.metadata,
        };
        self.authorizations
            .write()
            .await
            .insert(id, authorization.clone());
        Ok(authorization)
    }

    async fn retrieve_authorization(
        &self,
        id: &str,
    ) -> Result<PaymentAuthorization, GatewayError> {
        self.enter()?;
        self.authorizations
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))
    }
}
