use super::resolve_cart_owner;
use crate::handlers::common::{map_service_error, no_content_response, success_response};
use crate::{
    auth::MaybeIdentity,
    errors::ApiError,
    services::commerce::{CartOwner, CartView},
    AppState,
};
use axum::{
    extract::{Json, Path, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", post(add_to_cart))
        .route("/items/:item_id", delete(remove_cart_item))
}

fn require_owner(identity: &MaybeIdentity, headers: &HeaderMap) -> Result<CartOwner, ApiError> {
    resolve_cart_owner(identity.0.as_ref(), headers)?.ok_or_else(|| {
        ApiError::BadRequest("Sign in or send an x-session-token header".into())
    })
}

/// Get the caller's cart
async fn get_cart(
    State(state): State<AppState>,
    identity: MaybeIdentity,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let owner = require_owner(&identity, &headers)?;
    let cart = state
        .services
        .cart
        .list(&owner)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CartResponse::from(cart)))
}

/// Add item to cart
async fn add_to_cart(
    State(state): State<AppState>,
    identity: MaybeIdentity,
    headers: HeaderMap,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = require_owner(&identity, &headers)?;
    let cart = state
        .services
        .cart
        .add_item(&owner, payload.item_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(CartResponse::from(cart)))
}

/// Remove item from cart
async fn remove_cart_item(
    State(state): State<AppState>,
    identity: MaybeIdentity,
    headers: HeaderMap,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let owner = require_owner(&identity, &headers)?;
    state
        .services
        .cart
        .remove_item(&owner, item_id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

/// Clear cart
async fn clear_cart(
    State(state): State<AppState>,
    identity: MaybeIdentity,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let owner = require_owner(&identity, &headers)?;
    state
        .services
        .cart
        .clear(&owner)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

// Request/Response DTOs

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub item_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItemResponse {
    pub item_id: Uuid,
    pub name: String,
    pub kind: crate::entities::commerce::ItemKind,
    pub event_year: i32,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartResponse {
    pub items: Vec<CartItemResponse>,
    pub subtotal: i64,
    pub currency: Option<String>,
}

impl From<CartView> for CartResponse {
    fn from(cart: CartView) -> Self {
        Self {
            items: cart
                .items
                .into_iter()
                .map(|item| CartItemResponse {
                    item_id: item.id,
                    name: item.name,
                    kind: item.kind,
                    event_year: item.event_year,
                    amount: item.amount,
                    currency: item.currency,
                })
                .collect(),
            subtotal: cart.subtotal,
            currency: cart.currency,
        }
    }
}
