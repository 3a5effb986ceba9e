//! Signed payment webhooks drive the same confirmation as the client call.

mod common;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use common::{response_json, CouponSeed, TestApp, WEBHOOK_SECRET};
use serde_json::json;
use storefront_api::{entities::commerce::ItemKind, handlers::payment_webhooks::sign_payload};
use uuid::Uuid;

const WEBHOOK_URI: &str = "/api/v1/payments/webhook";

async fn signed_app() -> TestApp {
    TestApp::with_config(|cfg| {
        cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());
    })
    .await
}

fn succeeded_event(authorization_id: &str) -> Vec<u8> {
    event("payment_intent.succeeded", authorization_id)
}

fn event(event_type: &str, authorization_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": event_type,
        "data": { "object": { "id": authorization_id } },
    }))
    .unwrap()
}

async fn deliver(app: &TestApp, payload: Vec<u8>) -> StatusCode {
    let timestamp = Utc::now().timestamp();
    let signature = sign_payload(WEBHOOK_SECRET, timestamp, &payload);
    let timestamp = timestamp.to_string();
    app.request_raw(
        WEBHOOK_URI,
        payload,
        &[("x-timestamp", timestamp.as_str()), ("x-signature", signature.as_str())],
    )
    .await
    .status()
}

/// Checkout as `identity_id` and return the authorization id.
async fn signed_in_checkout(app: &TestApp, identity_id: Uuid, item_id: Uuid) -> String {
    let token = app.customer_token(identity_id, "member@example.com");
    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "itemIds": [item_id] })),
            Some(&token),
            &[],
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    response_json(response).await["authorizationId"]
        .as_str()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn succeeded_event_records_entitlements_for_signed_in_buyer() {
    let app = signed_app().await;
    let replay = app
        .seed_item("Keynote Replay", ItemKind::IndividualReplay, 2024, 4_900, "GBP")
        .await;
    let identity = Uuid::new_v4();
    let auth_id = signed_in_checkout(&app, identity, replay.id).await;
    app.gateway.mark_succeeded(&auth_id).await.unwrap();

    assert_eq!(deliver(&app, succeeded_event(&auth_id)).await, StatusCode::OK);
    let recorded = app.entitlements_for(identity).await;
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].authorization_id.as_deref(), Some(auth_id.as_str()));

    // Redelivery converges on the same rows.
    assert_eq!(deliver(&app, succeeded_event(&auth_id)).await, StatusCode::OK);
    assert_eq!(app.entitlements_for(identity).await.len(), 1);
}

#[tokio::test]
async fn free_checkout_settles_through_setup_intent_event() {
    let app = signed_app().await;
    let replay = app
        .seed_item("Keynote Replay", ItemKind::IndividualReplay, 2024, 4_900, "GBP")
        .await;
    app.seed_coupon(CouponSeed::fixed("SPEAKER", 10_000, "GBP")).await;
    let identity = Uuid::new_v4();
    let token = app.customer_token(identity, "speaker@example.com");
    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "itemIds": [replay.id], "couponCode": "SPEAKER" })),
            Some(&token),
            &[],
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    assert_eq!(body["amount"], 0);
    let auth_id = body["authorizationId"].as_str().unwrap().to_string();
    app.gateway.mark_succeeded(&auth_id).await.unwrap();

    assert_eq!(
        deliver(&app, event("setup_intent.succeeded", &auth_id)).await,
        StatusCode::OK
    );
    let recorded = app.entitlements_for(identity).await;
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].discount_applied, 4_900);
}

#[tokio::test]
async fn pending_authorization_asks_for_redelivery() {
    let app = signed_app().await;
    let replay = app
        .seed_item("Keynote Replay", ItemKind::IndividualReplay, 2024, 4_900, "GBP")
        .await;
    let auth_id = signed_in_checkout(&app, Uuid::new_v4(), replay.id).await;

    assert_eq!(
        deliver(&app, succeeded_event(&auth_id)).await,
        StatusCode::CONFLICT
    );
    assert_eq!(app.entitlement_count().await, 0);
}

#[tokio::test]
async fn guest_purchase_is_left_for_the_client() {
    let app = signed_app().await;
    let replay = app
        .seed_item("Keynote Replay", ItemKind::IndividualReplay, 2024, 4_900, "GBP")
        .await;
    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "itemIds": [replay.id], "guestEmail": "guest@example.com" })),
            None,
            &[],
        )
        .await;
    let auth_id = response_json(response).await["authorizationId"]
        .as_str()
        .unwrap()
        .to_string();
    app.gateway.mark_succeeded(&auth_id).await.unwrap();

    assert_eq!(deliver(&app, succeeded_event(&auth_id)).await, StatusCode::OK);
    assert_eq!(app.entitlement_count().await, 0);
}

#[tokio::test]
async fn bad_or_missing_signature_is_rejected() {
    let app = signed_app().await;
    let payload = succeeded_event("pi_unknown");
    let timestamp = Utc::now().timestamp().to_string();

    let response = app
        .request_raw(
            WEBHOOK_URI,
            payload.clone(),
            &[("x-timestamp", timestamp.as_str()), ("x-signature", "deadbeef")],
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.request_raw(WEBHOOK_URI, payload, &[]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn stripe_signature_header_is_accepted() {
    let app = signed_app().await;
    let payload = serde_json::to_vec(&json!({
        "type": "payment_intent.created",
        "data": { "object": { "id": "pi_ignored" } },
    }))
    .unwrap();
    let timestamp = Utc::now().timestamp();
    let header = format!(
        "t={},v1={}",
        timestamp,
        sign_payload(WEBHOOK_SECRET, timestamp, &payload)
    );

    let response = app
        .request_raw(WEBHOOK_URI, payload, &[("stripe-signature", header.as_str())])
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unsigned_webhooks_pass_when_no_secret_is_configured() {
    let app = TestApp::new().await;
    let payload = serde_json::to_vec(&json!({ "type": "charge.refunded" })).unwrap();

    let response = app.request_raw(WEBHOOK_URI, payload, &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_payload_is_a_bad_request() {
    let app = TestApp::new().await;
    let response = app
        .request_raw(WEBHOOK_URI, b"not json".to_vec(), &[])
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
