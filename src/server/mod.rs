//! HTTP surface: the webhook endpoint plus read-only inspection routes.
//!
//! # Endpoints
//!
//! - `POST <hook path>` - authenticated webhook deliveries (200 `OK`)
//! - `GET /` - fixed index text
//! - `GET /health` - liveness
//! - `GET /pools` - keeper pool views from the last tick, as JSON
//! - `GET /history` - keeper action history, as JSON
//!
//! Any other request gets 405.

use std::sync::Arc;

use axum::Json;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post};

use crate::config::ConfigAgent;
use crate::keeper::{HistorySnapshot, MergeController, Pool};
use crate::plugins::PluginRegistry;

pub mod webhook;

pub use webhook::{WebhookError, webhook_handler};

pub const DEFAULT_HOOK_PATH: &str = "/hook";

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 25 << 20;

const INDEX_TEXT: &str = "Lighthouse: send webhooks to the hook endpoint.\n";

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Arc<ConfigAgent>,
    plugins: PluginRegistry,
    hmac_secret: Vec<u8>,
    keeper: Option<Arc<dyn MergeController>>,
}

impl AppState {
    pub fn new(
        config: Arc<ConfigAgent>,
        plugins: PluginRegistry,
        hmac_secret: impl Into<Vec<u8>>,
        keeper: Option<Arc<dyn MergeController>>,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                config,
                plugins,
                hmac_secret: hmac_secret.into(),
                keeper,
            }),
        }
    }

    pub fn config(&self) -> &Arc<ConfigAgent> {
        &self.inner.config
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.inner.plugins
    }

    pub fn hmac_secret(&self) -> &[u8] {
        &self.inner.hmac_secret
    }

    pub fn keeper(&self) -> Option<&Arc<dyn MergeController>> {
        self.inner.keeper.as_ref()
    }
}

async fn index_handler() -> &'static str {
    INDEX_TEXT
}

pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

async fn pools_handler(State(app): State<AppState>) -> Json<Vec<Pool>> {
    Json(app.keeper().map(|k| k.pools()).unwrap_or_default())
}

async fn history_handler(State(app): State<AppState>) -> Json<HistorySnapshot> {
    Json(app.keeper().map(|k| k.history()).unwrap_or_default())
}

async fn method_not_allowed() -> StatusCode {
    StatusCode::METHOD_NOT_ALLOWED
}

pub fn build_router(app_state: AppState, hook_path: &str) -> axum::Router {
    axum::Router::new()
        .route("/", get(index_handler))
        .route(hook_path, post(webhook_handler))
        .route("/health", get(health_handler))
        .route("/pools", get(pools_handler))
        .route("/history", get(history_handler))
        .fallback(method_not_allowed)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(app_state)
}
