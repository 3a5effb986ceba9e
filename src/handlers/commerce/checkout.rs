use super::resolve_cart_owner;
use crate::handlers::common::{created_response, map_service_error, success_response, validate_input};
use crate::{
    auth::MaybeIdentity,
    errors::ApiError,
    services::commerce::{CheckoutRequest, ConfirmRequest},
    AppState,
};
use axum::{
    extract::{Json, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::post,
    Router,
};

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(start_checkout))
        .route("/confirm", post(confirm_checkout))
}

/// Price the items and create a payment authorization
async fn start_checkout(
    State(state): State<AppState>,
    identity: MaybeIdentity,
    headers: HeaderMap,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let cart_owner = resolve_cart_owner(identity.0.as_ref(), &headers)?;
    let checkout = state
        .services
        .checkout
        .create_checkout(payload, identity.0.as_ref(), cart_owner)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(checkout))
}

/// Record entitlements for a succeeded authorization
async fn confirm_checkout(
    State(state): State<AppState>,
    identity: MaybeIdentity,
    Json(payload): Json<ConfirmRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let confirmation = state
        .services
        .entitlements
        .confirm(payload, identity.0.as_ref())
        .await
        .map_err(map_service_error)?;

    Ok(success_response(confirmation))
}
