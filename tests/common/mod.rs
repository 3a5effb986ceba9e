#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use serde_json::Value;
use storefront_api::{
    auth::TokenService,
    config::AppConfig,
    db,
    entities::commerce::{
        catalog_item, coupon, entitlement, CatalogItemModel, Coupon, CouponModel, DiscountKind,
        Entitlement, EntitlementModel, ItemKind,
    },
    events::{self, EventSender},
    gateway::InMemoryGateway,
    handlers::AppServices,
    notifications::MemoryMailer,
    AppState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "k3Jx9QmZ2vLp8RtW4yNc7HbF6gDs1AeU0oIi5MnBqCwEzXrTvYuPlKjHgFdSaQwE";
pub const WEBHOOK_SECRET: &str = "whsec_integration";

/// Coupon fields a test cares about; everything else is open-ended and active.
#[derive(Debug, Clone)]
pub struct CouponSeed {
    pub code: &'static str,
    pub kind: DiscountKind,
    pub value: i64,
    pub currency: Option<&'static str>,
    pub catalog_item_id: Option<Uuid>,
    pub max_redemptions: Option<i32>,
    pub times_redeemed: i32,
}

impl CouponSeed {
    pub fn percentage(code: &'static str, value: i64) -> Self {
        Self {
            code,
            kind: DiscountKind::Percentage,
            value,
            currency: None,
            catalog_item_id: None,
            max_redemptions: None,
            times_redeemed: 0,
        }
    }

    pub fn fixed(code: &'static str, value: i64, currency: &'static str) -> Self {
        Self {
            kind: DiscountKind::FixedAmount,
            currency: Some(currency),
            ..Self::percentage(code, value)
        }
    }
}

/// Application wired to a temp-file SQLite database, the in-memory gateway
/// and the memory mailer.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<InMemoryGateway>,
    pub mailer: Arc<MemoryMailer>,
    tokens: Arc<TokenService>,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Construct a test application after adjusting the configuration.
    pub async fn with_config(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir for test database");
        let db_path = db_dir.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.cors_allow_any_origin = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        configure(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(InMemoryGateway::new());
        let mailer = Arc::new(MemoryMailer::new());
        let services =
            AppServices::new(db_arc.clone(), gateway.clone(), mailer.clone(), event_sender);
        let tokens = Arc::new(TokenService::new(cfg.jwt_secret.clone(), cfg.jwt_expiration));

        let state = AppState {
            db: db_arc,
            config: Arc::new(cfg),
            tokens: tokens.clone(),
            services,
        };
        let router = storefront_api::build_router(state.clone());

        Self {
            router,
            state,
            gateway,
            mailer,
            tokens,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    /// Bearer token for a signed-in customer.
    pub fn customer_token(&self, identity_id: Uuid, email: &str) -> String {
        self.tokens
            .issue(identity_id, Some(email.to_string()), vec!["customer".into()])
            .expect("issue customer token")
    }

    /// Bearer token carrying the admin role.
    pub fn admin_token(&self) -> String {
        self.tokens
            .issue(Uuid::new_v4(), Some("admin@example.com".into()), vec!["admin".into()])
            .expect("issue admin token")
    }

    /// Send a request with optional JSON body, bearer token and extra headers.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
        headers: &[(&str, &str)],
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Send a raw body, for signed webhook payloads.
    pub async fn request_raw(&self, uri: &str, payload: Vec<u8>, headers: &[(&str, &str)]) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::from(payload)).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_item(
        &self,
        name: &str,
        kind: ItemKind,
        event_year: i32,
        amount: i64,
        currency: &str,
    ) -> CatalogItemModel {
        let now = Utc::now();
        catalog_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            kind: Set(kind),
            event_year: Set(event_year),
            amount: Set(amount),
            currency: Set(currency.to_string()),
            content_ref: Set(None),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed catalog item")
    }

    pub async fn deactivate_item(&self, item: &CatalogItemModel) {
        let mut active: catalog_item::ActiveModel = item.clone().into();
        active.active = Set(false);
        active
            .update(&*self.state.db)
            .await
            .expect("deactivate catalog item");
    }

    /// Removes the item outright; its cart lines go with it.
    pub async fn delete_item(&self, item: &CatalogItemModel) {
        catalog_item::Entity::delete_by_id(item.id)
            .exec(&*self.state.db)
            .await
            .expect("delete catalog item");
    }

    pub async fn seed_coupon(&self, seed: CouponSeed) -> CouponModel {
        let now = Utc::now();
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(seed.code.to_string()),
            discount_kind: Set(seed.kind),
            discount_value: Set(seed.value),
            currency: Set(seed.currency.map(str::to_string)),
            catalog_item_id: Set(seed.catalog_item_id),
            valid_from: Set(None),
            valid_until: Set(None),
            max_redemptions: Set(seed.max_redemptions),
            times_redeemed: Set(seed.times_redeemed),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed coupon")
    }

    pub async fn update_coupon(&self, coupon: &CouponModel, value: i64, active: bool) {
        let mut model: coupon::ActiveModel = coupon.clone().into();
        model.discount_value = Set(value);
        model.active = Set(active);
        model.updated_at = Set(Utc::now());
        model.update(&*self.state.db).await.expect("update coupon");
    }

    pub async fn times_redeemed(&self, coupon_id: Uuid) -> i32 {
        Coupon::find_by_id(coupon_id)
            .one(&*self.state.db)
            .await
            .expect("load coupon")
            .expect("coupon exists")
            .times_redeemed
    }

    pub async fn entitlements_for(&self, identity_id: Uuid) -> Vec<EntitlementModel> {
        Entitlement::find()
            .filter(entitlement::Column::IdentityId.eq(identity_id))
            .all(&*self.state.db)
            .await
            .expect("load entitlements")
    }

    pub async fn entitlement_count(&self) -> u64 {
        Entitlement::find()
            .count(&*self.state.db)
            .await
            .expect("count entitlements")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
