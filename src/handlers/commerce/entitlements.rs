use crate::handlers::common::{map_service_error, success_response};
use crate::{auth::CurrentIdentity, errors::ApiError, AppState};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Serialize;
use uuid::Uuid;

/// Creates the router for the caller's entitlements
pub fn entitlements_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_entitlements))
        .route("/access/:item_id", get(check_access))
}

/// List the caller's entitlements
async fn list_entitlements(
    State(state): State<AppState>,
    identity: CurrentIdentity,
) -> Result<impl IntoResponse, ApiError> {
    let entitlements = state
        .services
        .entitlements
        .list_for_identity(identity.id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(entitlements))
}

/// Whether the caller may open an item
async fn check_access(
    State(state): State<AppState>,
    identity: CurrentIdentity,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let allowed = state
        .services
        .entitlements
        .can_access(identity.id, item_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(AccessResponse { allowed }))
}

#[derive(Debug, Serialize)]
pub struct AccessResponse {
    pub allowed: bool,
}
