//! declarant-ai library interface
//!
//! Batch tariff classification service: spreadsheet upload, concurrent
//! classification, tiered review and export. Exposed as a library for
//! integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use declarant_common::config::ClassifierConfig;
use declarant_common::events::EventBus;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::services::{BatchWorkflow, ClassificationClient, ProgressTracker};

/// Handle on a running batch
#[derive(Clone)]
pub struct ActiveBatch {
    pub cancel: CancellationToken,
    pub progress: Arc<ProgressTracker>,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Effective classifier parameters (TOML with stored overrides)
    pub config: Arc<RwLock<ClassifierConfig>>,
    /// Classification service client, rebuilt when settings change
    pub classifier: Arc<RwLock<Arc<dyn ClassificationClient>>>,
    /// Key the current client was built with
    pub api_key: Arc<RwLock<Option<String>>>,
    /// Runs in flight, keyed by session
    pub active_batches: Arc<RwLock<HashMap<Uuid, ActiveBatch>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last background failure, reported by /health
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        config: ClassifierConfig,
        classifier: Arc<dyn ClassificationClient>,
    ) -> Self {
        Self {
            db,
            event_bus,
            config: Arc::new(RwLock::new(config)),
            classifier: Arc::new(RwLock::new(classifier)),
            api_key: Arc::new(RwLock::new(None)),
            active_batches: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_api_key(self, api_key: Option<String>) -> Self {
        Self {
            api_key: Arc::new(RwLock::new(api_key)),
            ..self
        }
    }

    /// Workflow bound to the current classifier and parameters
    ///
    /// A batch keeps the snapshot it started with; later settings changes
    /// apply to the next batch.
    pub async fn workflow(&self) -> BatchWorkflow {
        let config = self.config.read().await.clone();
        let classifier = Arc::clone(&*self.classifier.read().await);
        BatchWorkflow::new(self.db.clone(), self.event_bus.clone(), classifier, config)
    }

    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::batch_routes())
        .merge(api::session_routes())
        .merge(api::export_routes())
        .merge(api::settings_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
