//! Stripe gateway against a mocked PaymentIntents and SetupIntents API.

use assert_matches::assert_matches;
use serde_json::json;
use std::time::Duration;
use storefront_api::gateway::{
    stripe::StripeConfig, AuthorizationStatus, GatewayError, Metadata, NewAuthorization,
    PaymentGateway, StripeGateway,
};
use wiremock::{
    matchers::{body_string_contains, header_exists, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

fn gateway(api_base: &str) -> StripeGateway {
    StripeGateway::new(StripeConfig {
        secret_key: "sk_test_mock".to_string(),
        api_base: api_base.to_string(),
        connect_timeout: Duration::from_secs(2),
    })
    .expect("stripe client")
}

fn intent(status: &str) -> serde_json::Value {
    json!({
        "id": "pi_mock_1",
        "client_secret": "pi_mock_1_secret_xyz",
        "amount": 39760,
        "currency": "gbp",
        "status": status,
        "metadata": { "snapshot_version": "1", "customer_email": "fan@example.com" },
    })
}

#[tokio::test]
async fn finds_existing_customer_by_email() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/customers"))
        .and(query_param("email", "fan@example.com"))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{ "id": "cus_123", "email": "fan@example.com" }],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let customer = gateway(&server.uri())
        .find_customer("fan@example.com")
        .await
        .unwrap()
        .expect("customer");
    assert_eq!(customer.id, "cus_123");
}

#[tokio::test]
async fn missing_customer_is_none_then_created() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/customers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/customers"))
        .and(body_string_contains("email=new%40example.com"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "cus_new" })))
        .expect(1)
        .mount(&server)
        .await;

    let gw = gateway(&server.uri());
    assert!(gw.find_customer("new@example.com").await.unwrap().is_none());
    let created = gw.create_customer("new@example.com").await.unwrap();
    assert_eq!(created.id, "cus_new");
    assert_eq!(created.email, "new@example.com");
}

#[tokio::test]
async fn authorization_is_form_encoded_with_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .and(body_string_contains("amount=39760"))
        .and(body_string_contains("currency=gbp"))
        .and(body_string_contains("customer=cus_123"))
        .and(body_string_contains("metadata%5Bsnapshot_version%5D=1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(intent("requires_payment_method")))
        .expect(1)
        .mount(&server)
        .await;

    let mut metadata = Metadata::new();
    metadata.insert("snapshot_version".into(), "1".into());
    let auth = gateway(&server.uri())
        .create_authorization(NewAuthorization {
            amount: 39_760,
            currency: "GBP".into(),
            customer_id: "cus_123".into(),
            metadata,
        })
        .await
        .unwrap();

    assert_eq!(auth.id, "pi_mock_1");
    assert_eq!(auth.client_handle, "pi_mock_1_secret_xyz");
    assert_eq!(auth.status, AuthorizationStatus::Pending);
    assert_eq!(auth.currency, "GBP");
}

#[tokio::test]
async fn retrieve_maps_status_and_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_mock_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(intent("succeeded")))
        .mount(&server)
        .await;

    let auth = gateway(&server.uri())
        .retrieve_authorization("pi_mock_1")
        .await
        .unwrap();
    assert_eq!(auth.status, AuthorizationStatus::Succeeded);
    assert_eq!(
        auth.metadata.get("customer_email").map(String::as_str),
        Some("fan@example.com")
    );
}

#[tokio::test]
async fn provider_errors_are_classified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/payment_intents/pi_missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "message": "No such payment_intent: 'pi_missing'", "code": "resource_missing" },
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(402).set_body_json(json!({
            "error": { "code": "card_declined" },
        })))
        .mount(&server)
        .await;

    let gw = gateway(&server.uri());
    assert_matches!(
        gw.retrieve_authorization("pi_missing").await,
        Err(GatewayError::NotFound(message)) if message.contains("pi_missing")
    );
    assert_matches!(
        gw.create_authorization(NewAuthorization {
            amount: 100,
            currency: "GBP".into(),
            customer_id: "cus_123".into(),
            metadata: Metadata::new(),
        })
        .await,
        Err(GatewayError::Rejected { status: 402, message }) if message == "card_declined"
    );
}

#[tokio::test]
async fn unreachable_provider_is_unavailable() {
    // Nothing listens on the discard port.
    let gw = gateway("http://127.0.0.1:9");
    assert_matches!(
        gw.find_customer("fan@example.com").await,
        Err(GatewayError::Unavailable(_))
    );
}

#[tokio::test]
async fn zero_total_creates_setup_intent_instead_of_payment_intent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": "amount_too_small" },
        })))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/setup_intents"))
        .and(body_string_contains("customer=cus_123"))
        .and(body_string_contains("usage=off_session"))
        .and(body_string_contains("metadata%5Bcheckout_currency%5D=gbp"))
        .and(body_string_contains("metadata%5Bsnapshot_version%5D=1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "seti_mock_1",
            "client_secret": "seti_mock_1_secret_xyz",
            "status": "requires_payment_method",
            "metadata": { "checkout_currency": "gbp", "snapshot_version": "1" },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut metadata = Metadata::new();
    metadata.insert("snapshot_version".into(), "1".into());
    let auth = gateway(&server.uri())
        .create_authorization(NewAuthorization {
            amount: 0,
            currency: "GBP".into(),
            customer_id: "cus_123".into(),
            metadata,
        })
        .await
        .unwrap();

    assert_eq!(auth.id, "seti_mock_1");
    assert_eq!(auth.client_handle, "seti_mock_1_secret_xyz");
    assert_eq!(auth.amount, 0);
    assert_eq!(auth.currency, "GBP");
    assert_eq!(auth.status, AuthorizationStatus::Pending);
}

#[tokio::test]
async fn confirmed_setup_intent_reads_back_as_succeeded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/setup_intents/seti_mock_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "seti_mock_1",
            "client_secret": "seti_mock_1_secret_xyz",
            "status": "succeeded",
            "metadata": {
                "checkout_currency": "gbp",
                "snapshot_version": "1",
                "customer_email": "fan@example.com",
            },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let auth = gateway(&server.uri())
        .retrieve_authorization("seti_mock_1")
        .await
        .unwrap();
    assert_eq!(auth.status, AuthorizationStatus::Succeeded);
    assert_eq!(auth.amount, 0);
    assert_eq!(auth.currency, "GBP");
    assert_eq!(
        auth.metadata.get("customer_email").map(String::as_str),
        Some("fan@example.com")
    );
}

#[tokio::test]
async fn malformed_ids_never_reach_the_provider() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": [] })))
        .expect(0)
        .mount(&server)
        .await;

    let gw = gateway(&server.uri());
    for id in ["../customers", "pi_1/../../customers", "pi_1?expand[]=customer", ""] {
        assert_matches!(
            gw.retrieve_authorization(id).await,
            Err(GatewayError::NotFound(_))
        );
    }
}
