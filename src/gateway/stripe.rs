use super::{
    AuthorizationStatus, GatewayCustomer, GatewayError, Metadata, NewAuthorization,
    PaymentAuthorization, PaymentGateway,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Stripe configuration
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    /// Base URL without trailing slash, e.g. `https://api.stripe.com`
    pub api_base: String,
    pub connect_timeout: Duration,
}

/// PaymentIntents-backed gateway. Free checkouts go through a SetupIntent,
/// since Stripe refuses a PaymentIntent for a zero amount.
#[derive(Clone)]
pub struct StripeGateway {
    config: StripeConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CustomerList {
    data: Vec<CustomerResponse>,
}

#[derive(Debug, Deserialize)]
struct CustomerResponse {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentResponse {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    amount: i64,
    currency: String,
    status: String,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Deserialize)]
struct SetupIntentResponse {
    id: String,
    #[serde(default)]
    client_secret: Option<String>,
    status: String,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

/// Collapses Stripe's intent lifecycle onto the three states checkout cares about.
fn map_status(status: &str) -> AuthorizationStatus {
    match status {
        "succeeded" => AuthorizationStatus::Succeeded,
        "canceled" => AuthorizationStatus::Failed,
        _ => AuthorizationStatus::Pending,
    }
}

impl From<PaymentIntentResponse> for PaymentAuthorization {
    fn from(intent: PaymentIntentResponse) -> Self {
        Self {
            client_handle: intent.client_secret.unwrap_or_default(),
            status: map_status(&intent.status),
            id: intent.id,
            amount: intent.amount,
            currency: intent.currency.to_ascii_uppercase(),
            metadata: intent.metadata,
        }
    }
}

/// SetupIntents carry no amount or currency; the currency rides in metadata.
const SETUP_CURRENCY_KEY: &str = "checkout_currency";

const SETUP_INTENT_PREFIX: &str = "seti_";

impl From<SetupIntentResponse> for PaymentAuthorization {
    fn from(intent: SetupIntentResponse) -> Self {
        let mut metadata = intent.metadata;
        let currency = metadata
            .remove(SETUP_CURRENCY_KEY)
            .unwrap_or_default()
            .to_ascii_uppercase();
        Self {
            client_handle: intent.client_secret.unwrap_or_default(),
            status: map_status(&intent.status),
            id: intent.id,
            amount: 0,
            currency,
            metadata,
        }
    }
}

/// Stripe object ids are `[A-Za-z0-9_]`; anything else never reaches the URL path.
fn valid_object_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 255
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn metadata_params(params: &mut Vec<(String, String)>, metadata: Metadata) {
    for (key, value) in metadata {
        params.push((format!("metadata[{}]", key), value));
    }
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn parse<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<StripeErrorEnvelope>(&body)
                .ok()
                .and_then(|env| env.error.message.or(env.error.code))
                .unwrap_or(body);
            warn!(status = status.as_u16(), "Stripe API error: {}", message);
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(GatewayError::NotFound(message));
            }
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }

    async fn create_setup_intent(
        &self,
        request: NewAuthorization,
    ) -> Result<PaymentAuthorization, GatewayError> {
        let mut params: Vec<(String, String)> = vec![
            ("customer".to_string(), request.customer_id),
            ("usage".to_string(), "off_session".to_string()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
            (
                format!("metadata[{}]", SETUP_CURRENCY_KEY),
                request.currency.to_ascii_lowercase(),
            ),
        ];
        metadata_params(&mut params, request.metadata);

        let response = self
            .client
            .post(self.url("setup_intents"))
            .basic_auth(&self.config.secret_key, Some(""))
            .form(&params)
            .send()
            .await
            .map_err(transport)?;

        let intent: SetupIntentResponse = Self::parse(response).await?;
        info!("SetupIntent created for free checkout: {}", intent.id);
        Ok(intent.into())
    }
}

fn transport(err: reqwest::Error) -> GatewayError {
    GatewayError::Unavailable(err.to_string())
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> &'static str {
        "stripe"
    }

    #[instrument(skip(self))]
    async fn find_customer(&self, email: &str) -> Result<Option<GatewayCustomer>, GatewayError> {
        let response = self
            .client
            .get(self.url("customers"))
            .basic_auth(&self.config.secret_key, Some(""))
            .query(&[("email", email), ("limit", "1")])
            .send()
            .await
            .map_err(transport)?;

        let list: CustomerList = Self::parse(response).await?;
        Ok(list.data.into_iter().next().map(|c| GatewayCustomer {
            email: c.email.unwrap_or_else(|| email.to_string()),
            id: c.id,
        }))
    }

    #[instrument(skip(self))]
    async fn create_customer(&self, email: &str) -> Result<GatewayCustomer, GatewayError> {
        let response = self
            .client
            .post(self.url("customers"))
            .basic_auth(&self.config.secret_key, Some(""))
            .form(&[("email", email)])
            .send()
            .await
            .map_err(transport)?;

        let customer: CustomerResponse = Self::parse(response).await?;
        info!("Stripe customer created: {}", customer.id);
        Ok(GatewayCustomer {
            id: customer.id,
            email: email.to_string(),
        })
    }

    #[instrument(skip(self, request), fields(amount = request.amount, currency = %request.currency))]
    async fn create_authorization(
        &self,
        request: NewAuthorization,
    ) -> Result<PaymentAuthorization, GatewayError> {
        if request.amount == 0 {
            return self.create_setup_intent(request).await;
        }

        let mut params: Vec<(String, String)> = vec![
            ("amount".to_string(), request.amount.to_string()),
            ("currency".to_string(), request.currency.to_ascii_lowercase()),
            ("customer".to_string(), request.customer_id),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        metadata_params(&mut params, request.metadata);

        let response = self
            .client
            .post(self.url("payment_intents"))
            .basic_auth(&self.config.secret_key, Some(""))
            .form(&params)
            .send()
            .await
            .map_err(transport)?;

        let intent: PaymentIntentResponse = Self::parse(response).await?;
        info!("PaymentIntent created: {}", intent.id);
        Ok(intent.into())
    }

    #[instrument(skip(self))]
    async fn retrieve_authorization(
        &self,
        id: &str,
    ) -> Result<PaymentAuthorization, GatewayError> {
        if !valid_object_id(id) {
            return Err(GatewayError::NotFound(format!(
                "Malformed authorization id: {}",
                id
            )));
        }

        let setup = id.starts_with(SETUP_INTENT_PREFIX);
        let path = if setup {
            format!("setup_intents/{}", id)
        } else {
            format!("payment_intents/{}", id)
        };
        let response = self
            .client
            .get(self.url(&path))
            .basic_auth(&self.config.secret_key, Some(""))
            .send()
            .await
            .map_err(transport)?;

        if setup {
            let intent: SetupIntentResponse = Self::parse(response).await?;
            Ok(intent.into())
        } else {
            let intent: PaymentIntentResponse = Self::parse(response).await?;
            Ok(intent.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripe_statuses_collapse_to_three_states() {
        assert_eq!(map_status("succeeded"), AuthorizationStatus::Succeeded);
        assert_eq!(map_status("canceled"), AuthorizationStatus::Failed);
        assert_eq!(map_status("requires_payment_method"), AuthorizationStatus::Pending);
        assert_eq!(map_status("processing"), AuthorizationStatus::Pending);
    }

    #[test]
    fn intent_conversion_keeps_metadata_and_uppercases_currency() {
        let json = r#"{
            "id": "pi_123",
            "client_secret": "pi_123_secret_abc",
            "amount": 39760,
            "currency": "gbp",
            "status": "succeeded",
            "metadata": {"snapshot_version": "1"}
        }"#;
        let intent: PaymentIntentResponse = serde_json::from_str(json).unwrap();
        let auth = PaymentAuthorization::from(intent);
        assert_eq!(auth.currency, "GBP");
        assert_eq!(auth.client_handle, "pi_123_secret_abc");
        assert_eq!(auth.metadata.get("snapshot_version").map(String::as_str), Some("1"));
    }

    #[test]
    fn setup_intent_is_a_zero_amount_authorization() {
        let json = r#"{
            "id": "seti_123",
            "client_secret": "seti_123_secret_abc",
            "status": "succeeded",
            "metadata": {"checkout_currency": "gbp", "snapshot_version": "1"}
        }"#;
        let intent: SetupIntentResponse = serde_json::from_str(json).unwrap();
        let auth = PaymentAuthorization::from(intent);
        assert_eq!(auth.amount, 0);
        assert_eq!(auth.currency, "GBP");
        assert_eq!(auth.status, AuthorizationStatus::Succeeded);
        assert!(!auth.metadata.contains_key(SETUP_CURRENCY_KEY));
        assert_eq!(auth.metadata.get("snapshot_version").map(String::as_str), Some("1"));
    }

    #[test]
    fn object_ids_outside_the_stripe_alphabet_are_rejected() {
        assert!(valid_object_id("pi_3Nabc123"));
        assert!(valid_object_id("seti_1Q2w3E"));
        assert!(!valid_object_id(""));
        assert!(!valid_object_id("../customers"));
        assert!(!valid_object_id("pi_1?expand[]=customer"));
        assert!(!valid_object_id("pi 1"));
        assert!(!valid_object_id(&"a".repeat(256)));
    }
}
