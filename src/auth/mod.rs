//! Bearer-token authentication and the admin capability.
//!
//! Requests are authenticated once at the boundary. Handlers receive either a
//! [`MaybeIdentity`] (guest checkout is allowed) or an [`AdminContext`], which
//! is the only way to reach administrative service operations.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub const ADMIN_ROLE: &str = "admin";

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,           // Identity id
    pub email: Option<String>, // Account email, when known
    #[serde(default)]
    pub roles: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Authenticated caller resolved from a bearer token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentIdentity {
    pub id: Uuid,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

impl CurrentIdentity {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}

/// Capability token for administrative operations.
///
/// Only constructible from an identity holding the admin role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminContext {
    admin_id: Uuid,
}

impl AdminContext {
    pub fn from_identity(identity: &CurrentIdentity) -> Result<Self, AuthError> {
        if identity.has_role(ADMIN_ROLE) {
            Ok(Self {
                admin_id: identity.id,
            })
        } else {
            Err(AuthError::InsufficientPermissions)
        }
    }

    pub fn admin_id(&self) -> Uuid {
        self.admin_id
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error("Insufficient permissions")]
    InsufficientPermissions,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_code, error_message): (StatusCode, &str, String) = match &self {
            Self::MissingAuth => (
                StatusCode::UNAUTHORIZED,
                "AUTH_MISSING",
                "Authentication required".to_string(),
            ),
            Self::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "AUTH_INVALID_TOKEN",
                "Invalid authentication token".to_string(),
            ),
            Self::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                "AUTH_TOKEN_EXPIRED",
                "Token has expired".to_string(),
            ),
            Self::TokenCreation(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "AUTH_TOKEN_CREATION_FAILED",
                msg.clone(),
            ),
            Self::InsufficientPermissions => (
                StatusCode::FORBIDDEN,
                "AUTH_INSUFFICIENT_PERMISSIONS",
                "Insufficient permissions".to_string(),
            ),
        };

        let body = Json(serde_json::json!({
            "error": {
                "code": error_code,
                "message": error_message,
            }
        }));

        (status, body).into_response()
    }
}

/// Issues and validates HS256 bearer tokens
#[derive(Clone)]
pub struct TokenService {
    secret: String,
    expiration_secs: i64,
}

impl TokenService {
    pub fn new(secret: impl Into<String>, expiration_secs: usize) -> Self {
        Self {
            secret: secret.into(),
            expiration_secs: expiration_secs as i64,
        }
    }

    pub fn issue(
        &self,
        identity_id: Uuid,
        email: Option<String>,
        roles: Vec<String>,
    ) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: identity_id.to_string(),
            email,
            roles,
            iat: now,
            exp: now + self.expiration_secs,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    pub fn validate(&self, token: &str) -> Result<CurrentIdentity, AuthError> {
        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })?
        .claims;

        let id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        Ok(CurrentIdentity {
            id,
            email: claims.email,
            roles: claims.roles,
        })
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Optional authentication: no header means a guest, a bad token is rejected.
#[derive(Debug, Clone)]
pub struct MaybeIdentity(pub Option<CurrentIdentity>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeIdentity
where
    S: Send + Sync,
    Arc<TokenService>: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(parts) else {
            return Ok(Self(None));
        };
        let tokens = Arc::<TokenService>::from_ref(state);
        tokens.validate(token).map(|identity| Self(Some(identity)))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
    Arc<TokenService>: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        MaybeIdentity::from_request_parts(parts, state)
            .await?
            .0
            .ok_or(AuthError::MissingAuth)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminContext
where
    S: Send + Sync,
    Arc<TokenService>: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let identity = CurrentIdentity::from_request_parts(parts, state).await?;
        AdminContext::from_identity(&identity)
    }
}
