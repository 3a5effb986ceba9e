use crate::handlers::common::{
    created_response, map_service_error, no_content_response, success_response,
};
use crate::{auth::AdminContext, errors::ApiError, services::commerce::GrantTarget, AppState};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{delete, post},
    Router,
};
use serde::Deserialize;
use uuid::Uuid;

/// Creates the router for administrative entitlement endpoints
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/entitlements", post(grant_entitlement))
        .route("/entitlements/:id", delete(revoke_entitlement))
}

/// Grant an entitlement without payment
async fn grant_entitlement(
    State(state): State<AppState>,
    admin: AdminContext,
    Json(payload): Json<GrantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .services
        .entitlements
        .grant_manual(&admin, payload.identity_id, payload.target)
        .await
        .map_err(map_service_error)?;

    if outcome.created {
        Ok(created_response(outcome))
    } else {
        Ok(success_response(outcome))
    }
}

/// Revoke an entitlement
async fn revoke_entitlement(
    State(state): State<AppState>,
    admin: AdminContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .entitlements
        .revoke(&admin, id)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    pub identity_id: Uuid,
    pub target: GrantTarget,
}
