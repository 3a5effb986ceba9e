use crate::handlers::common::{map_service_error, success_response, validate_input};
use crate::{errors::ApiError, services::commerce::CouponRejection, AppState};
use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Creates the router for coupon endpoints
pub fn coupons_routes() -> Router<AppState> {
    Router::new().route("/evaluate", post(evaluate_coupon))
}

/// Preview a coupon against a set of items. Never counts a redemption.
async fn evaluate_coupon(
    State(state): State<AppState>,
    Json(payload): Json<EvaluateCouponRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;

    let evaluation = state
        .services
        .checkout
        .preview_coupon(&payload.code, &payload.item_ids)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(EvaluateCouponResponse {
        valid: evaluation.valid,
        code: evaluation.code,
        discount: evaluation.discount_amount,
        reason: evaluation.rejection,
    }))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateCouponRequest {
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[serde(default)]
    pub item_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateCouponResponse {
    pub valid: bool,
    pub code: Option<String>,
    pub discount: i64,
    pub reason: Option<CouponRejection>,
}
