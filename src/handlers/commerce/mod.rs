//! Storefront API handlers
pub mod admin;
pub mod carts;
pub mod catalog;
pub mod checkout;
pub mod coupons;
pub mod entitlements;

// Re-export route builders
pub use admin::admin_routes;
pub use carts::carts_routes;
pub use catalog::catalog_routes;
pub use checkout::checkout_routes;
pub use coupons::coupons_routes;
pub use entitlements::entitlements_routes;

use crate::{auth::CurrentIdentity, errors::ApiError, services::commerce::CartOwner};
use axum::http::HeaderMap;

/// Header carrying a guest's cart session token
pub const SESSION_TOKEN_HEADER: &str = "x-session-token";

const MAX_SESSION_TOKEN_LEN: usize = 128;

/// Cart owner for a request: the signed-in identity, else the session token.
///
/// `Ok(None)` when neither is present; a malformed token is rejected.
pub fn resolve_cart_owner(
    identity: Option<&CurrentIdentity>,
    headers: &HeaderMap,
) -> Result<Option<CartOwner>, ApiError> {
    if let Some(identity) = identity {
        return Ok(Some(CartOwner::Identity(identity.id)));
    }

    let Some(raw) = headers.get(SESSION_TOKEN_HEADER) else {
        return Ok(None);
    };
    let token = raw
        .to_str()
        .map(str::trim)
        .map_err(|_| ApiError::BadRequest("Session token must be ASCII".into()))?;

    let well_formed = !token.is_empty()
        && token.len() <= MAX_SESSION_TOKEN_LEN
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !well_formed {
        return Err(ApiError::BadRequest("Malformed session token".into()));
    }

    Ok(Some(CartOwner::Session(token.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use uuid::Uuid;

    #[test]
    fn identity_takes_precedence_over_session() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_TOKEN_HEADER, HeaderValue::from_static("sess-1"));
        let identity = CurrentIdentity {
            id: Uuid::new_v4(),
            email: None,
            roles: vec![],
        };
        let owner = resolve_cart_owner(Some(&identity), &headers).unwrap();
        assert_eq!(owner, Some(CartOwner::Identity(identity.id)));
    }

    #[test]
    fn session_token_is_validated() {
        let mut headers = HeaderMap::new();
        assert_eq!(resolve_cart_owner(None, &headers).unwrap(), None);

        headers.insert(SESSION_TOKEN_HEADER, HeaderValue::from_static("sess_ok-1"));
        assert_eq!(
            resolve_cart_owner(None, &headers).unwrap(),
            Some(CartOwner::Session("sess_ok-1".into()))
        );

        headers.insert(SESSION_TOKEN_HEADER, HeaderValue::from_static("bad token!"));
        assert!(resolve_cart_owner(None, &headers).is_err());
    }
}
