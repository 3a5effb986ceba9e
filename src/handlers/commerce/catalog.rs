use crate::handlers::common::{map_service_error, success_response};
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use uuid::Uuid;

/// Creates the router for catalog endpoints
pub fn catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_catalog))
        .route("/:id", get(get_catalog_item))
}

/// List active catalog items
async fn list_catalog(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let items = state
        .services
        .catalog
        .list_active()
        .await
        .map_err(map_service_error)?;

    Ok(success_response(items))
}

/// Get a single catalog item
async fn get_catalog_item(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let item = state
        .services
        .catalog
        .get(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(item))
}
