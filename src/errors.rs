use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::gateway::GatewayError;
use crate::services::commerce::snapshot::SnapshotError;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Machine-readable error code for client branching
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Additional error details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::error::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Cart mixes currencies: {0}")]
    CurrencyMismatch(String),

    #[error("An email address or signed-in account is required to complete checkout")]
    IdentityRequired,

    #[error("Catalog item {0} is not available for purchase")]
    ItemInactive(Uuid),

    /// Passed through unchanged so callers can tell provider outages from bad requests.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("We couldn't verify your payment yet (authorization {authorization_id} is {status}); please retry shortly")]
    NotSucceeded {
        authorization_id: String,
        status: String,
    },

    #[error("Checkout snapshot is invalid: {0}")]
    InvalidSnapshot(#[from] SnapshotError),

    #[error("Entitlement recording incomplete: {failed} of {total} items failed; please retry")]
    EntitlementIncomplete { failed: usize, total: usize },

    #[error("Duplicate entitlements detected: {0}")]
    EntitlementConflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::InternalError(_) | Self::EntitlementConflict(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::EmptyCart
            | Self::CurrencyMismatch(_)
            | Self::IdentityRequired => StatusCode::BAD_REQUEST,
            Self::ItemInactive(_) | Self::InvalidSnapshot(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::NotSucceeded { .. } => StatusCode::CONFLICT,
            Self::EntitlementIncomplete { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
        }
    }

    /// Stable machine-readable code for the error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::EmptyCart => "empty_cart",
            Self::CurrencyMismatch(_) => "currency_mismatch",
            Self::IdentityRequired => "identity_required",
            Self::ItemInactive(_) => "item_inactive",
            Self::Gateway(_) => "gateway_error",
            Self::NotSucceeded { .. } => "not_succeeded",
            Self::InvalidSnapshot(_) => "invalid_snapshot",
            Self::EntitlementIncomplete { .. } => "entitlement_incomplete",
            Self::EntitlementConflict(_) => "entitlement_conflict",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) | Self::EntitlementConflict(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Whether the caller can retry the same request and expect progress.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Gateway(_) | Self::NotSucceeded { .. } | Self::EntitlementIncomplete { .. }
        )
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            code: Some(self.code().to_string()),
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

/// API Error type for HTTP responses
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            ApiError::ServiceError(service_error) => return service_error.into_response(),
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg, "validation_error"),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Unauthorized".to_string(),
                "unauthorized",
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, "bad_request"),
        };

        let error_response = ErrorResponse {
            error: status
                .canonical_reason()
                .unwrap_or("Unknown Error")
                .to_string(),
            message,
            code: Some(code.to_string()),
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::EmptyCart.into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert_eq!(payload.code.as_deref(), Some("empty_cart"));
    }

    #[tokio::test]
    async fn api_error_delegates_to_service_error_response() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-api-42"), async {
                ApiError::ServiceError(ServiceError::Forbidden("nope".into())).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-api-42"));
    }

    #[test]
    fn checkout_error_status_code_mapping() {
        assert_eq!(ServiceError::EmptyCart.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::CurrencyMismatch("GBP, USD".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::IdentityRequired.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::ItemInactive(Uuid::nil()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::Gateway(GatewayError::Unavailable("down".into())).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::NotSucceeded {
                authorization_id: "pi_1".into(),
                status: "pending".into()
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::EntitlementIncomplete { failed: 1, total: 2 }.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServiceError::EntitlementConflict("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn gateway_errors_pass_through_verbatim() {
        let inner = GatewayError::Rejected {
            status: 402,
            message: "card_declined".into(),
        };
        let expected = inner.to_string();
        let err: ServiceError = inner.into();
        assert_eq!(err.to_string(), expected);
        assert_eq!(err.response_message(), expected);
        assert!(err.is_retryable());
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::InternalError("sensitive".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::EntitlementConflict("identity x item y".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::NotFound("Catalog item".into()).response_message(),
            "Not found: Catalog item"
        );
    }
}
