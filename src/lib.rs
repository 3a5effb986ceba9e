//! Storefront API Library
//!
//! Checkout and entitlement resolution for an event-ticketing storefront:
//! catalog, carts, coupons, payment authorizations and the entitlement
//! records a confirmed payment turns into.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod notifications;
pub mod services;
pub mod tracing;

use axum::{
    extract::{FromRef, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::auth::TokenService;
use crate::config::AppConfig;
use crate::gateway::{GatewayError, InMemoryGateway, PaymentGateway, StripeGateway};
use crate::notifications::{HttpMailer, LogMailer, Mailer, MailerError};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub tokens: Arc<TokenService>,
    pub services: handlers::AppServices,
}

impl FromRef<AppState> for Arc<TokenService> {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

/// Versioned API routes, nested under `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest("/catalog", handlers::commerce::catalog_routes())
        .nest("/cart", handlers::commerce::carts_routes())
        .nest("/coupons", handlers::commerce::coupons_routes())
        .nest("/checkout", handlers::commerce::checkout_routes())
        .nest("/entitlements", handlers::commerce::entitlements_routes())
        .nest("/admin", handlers::commerce::admin_routes())
        .route(
            "/payments/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        )
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let healthy = db::check_connection(&state.db).await.is_ok();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "checks": { "database": if healthy { "healthy" } else { "unhealthy" } },
        "request_id": crate::tracing::current_request_id().map(|rid| rid.to_string()),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status, Json(body))
}

/// CORS from configured origins, permissive when allowed, `None` otherwise.
pub fn cors_layer(cfg: &AppConfig) -> Option<CorsLayer> {
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    if let Some(origins) = configured_origins {
        Some(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else if cfg.should_allow_permissive_cors() {
        Some(CorsLayer::permissive())
    } else {
        None
    }
}

/// Full application router: health, the v1 API and the request middleware.
pub fn build_router(state: AppState) -> Router {
    let mut app = Router::<AppState>::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes())
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing());

    if let Some(cors) = cors_layer(&state.config) {
        app = app.layer(cors);
    }

    app
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state)
}

/// Payment gateway selected by `payment_gateway`.
pub fn build_gateway(cfg: &AppConfig) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
    match cfg.payment_gateway.to_ascii_lowercase().as_str() {
        "stripe" => {
            let secret_key = cfg.stripe_secret_key.clone().ok_or_else(|| {
                GatewayError::Unavailable("stripe secret key is not configured".into())
            })?;
            let gateway = StripeGateway::new(gateway::stripe::StripeConfig {
                secret_key,
                api_base: cfg.stripe_api_base.clone(),
                connect_timeout: cfg.gateway_connect_timeout(),
            })?;
            Ok(Arc::new(gateway))
        }
        _ => Ok(Arc::new(InMemoryGateway::new())),
    }
}

/// Mailer selected by `mailer_backend`.
pub fn build_mailer(cfg: &AppConfig) -> Result<Arc<dyn Mailer>, MailerError> {
    match cfg.mailer_backend.to_ascii_lowercase().as_str() {
        "http" => {
            let endpoint = cfg.mailer_endpoint.clone().ok_or_else(|| {
                MailerError::Transport("mailer endpoint is not configured".into())
            })?;
            Ok(Arc::new(HttpMailer::new(
                endpoint,
                cfg.mailer_api_key.clone(),
                cfg.mailer_from.clone(),
                cfg.gateway_connect_timeout(),
            )?))
        }
        _ => Ok(Arc::new(LogMailer)),
    }
}
