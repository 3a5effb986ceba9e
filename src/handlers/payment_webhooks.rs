use crate::{
    errors::ServiceError,
    services::commerce::ConfirmRequest,
    AppState,
};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use metrics::counter;
use serde_json::Value;
use sha2::Sha256;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Paid checkouts settle as PaymentIntents, free ones as SetupIntents.
const SUCCEEDED_EVENTS: [&str; 2] = ["payment_intent.succeeded", "setup_intent.succeeded"];

fn confirms_purchase(event_type: &str) -> bool {
    SUCCEEDED_EVENTS.contains(&event_type)
}

// POST /api/v1/payments/webhook
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(secret) = state.config.payment_webhook_secret.as_deref() {
        let now = Utc::now().timestamp();
        if !verify_signature(
            &headers,
            &body,
            secret,
            state.config.payment_webhook_tolerance_secs,
            now,
        ) {
            warn!("Payment webhook signature verification failed");
            counter!("storefront.webhook.rejected", 1);
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
    }

    let json: Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::ValidationError(format!("invalid json: {}", e)))?;

    let event_type = json.get("type").and_then(Value::as_str).unwrap_or_default();
    if !confirms_purchase(event_type) {
        info!("Unhandled payment webhook type: {}", event_type);
        return Ok((StatusCode::OK, "ok"));
    }

    let authorization_id = json
        .pointer("/data/object/id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ServiceError::ValidationError("event has no object id".into()))?;

    // Only the snapshot identity is trusted here; guests finish through the
    // client confirm call.
    let request = ConfirmRequest {
        authorization_id: authorization_id.to_string(),
        create_account: false,
    };
    match state.services.entitlements.confirm(request, None).await {
        Ok(_) => {
            counter!("storefront.webhook.confirmed", 1);
            Ok((StatusCode::OK, "ok"))
        }
        Err(e) if e.is_retryable() => Err(e),
        Err(e) => {
            info!(authorization_id, error = %e, "Webhook confirmation deferred to client");
            Ok((StatusCode::OK, "ok"))
        }
    }
}

/// Accepts `x-timestamp`/`x-signature` or a Stripe-style `Stripe-Signature`
/// (`t=..,v1=..`) header. The signed payload is `"{timestamp}.{body}"`.
pub fn verify_signature(
    headers: &HeaderMap,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> bool {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let (timestamp, signatures): (&str, Vec<&str>) =
        if let (Some(ts), Some(sig)) = (header("x-timestamp"), header("x-signature")) {
            (ts, vec![sig])
        } else if let Some(raw) = header("stripe-signature") {
            let mut ts = "";
            let mut v1 = Vec::new();
            for part in raw.split(',') {
                match part.trim().split_once('=') {
                    Some(("t", val)) => ts = val,
                    Some(("v1", val)) => v1.push(val),
                    _ => {}
                }
            }
            (ts, v1)
        } else {
            return false;
        };

    let Ok(ts) = timestamp.parse::<i64>() else {
        return false;
    };
    if (now - ts).unsigned_abs() > tolerance_secs {
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    signatures
        .iter()
        .any(|candidate| constant_time_eq(&expected, candidate))
}

/// Signs `payload` the way [`verify_signature`] expects.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"type":"payment_intent.succeeded"}"#;

    #[test]
    fn generic_headers_verify() {
        let now = 1_700_000_000;
        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", HeaderValue::from_str(&now.to_string()).unwrap());
        headers.insert(
            "x-signature",
            HeaderValue::from_str(&sign_payload(SECRET, now, BODY)).unwrap(),
        );
        assert!(verify_signature(&headers, BODY, SECRET, 300, now));
        assert!(!verify_signature(&headers, b"tampered", SECRET, 300, now));
        assert!(!verify_signature(&headers, BODY, "other", 300, now));
    }

    #[test]
    fn stripe_header_accepts_any_v1_and_checks_tolerance() {
        let ts = 1_700_000_000;
        let sig = sign_payload(SECRET, ts, BODY);
        let mut headers = HeaderMap::new();
        headers.insert(
            "Stripe-Signature",
            HeaderValue::from_str(&format!("t={},v1=deadbeef,v1={}", ts, sig)).unwrap(),
        );
        assert!(verify_signature(&headers, BODY, SECRET, 300, ts + 10));
        assert!(!verify_signature(&headers, BODY, SECRET, 300, ts + 301));
    }

    #[test]
    fn both_intent_kinds_confirm() {
        assert!(confirms_purchase("payment_intent.succeeded"));
        assert!(confirms_purchase("setup_intent.succeeded"));
        assert!(!confirms_purchase("payment_intent.payment_failed"));
        assert!(!confirms_purchase("setup_intent.setup_failed"));
    }

    #[test]
    fn missing_headers_fail() {
        assert!(!verify_signature(&HeaderMap::new(), BODY, SECRET, 300, 0));
    }
}
