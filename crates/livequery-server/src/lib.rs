//! livequery server - change notifier and live topic streams.
//!
//! The CRUD engine reports committed mutations to the [`Notifier`], which
//! appends them to the change log and signals every registered topic whose
//! dependency set contains the changed resource. Clients watch topics over
//! server-sent events, receiving either bare signals or recomputed snapshots.

pub mod config;
pub mod error;
pub mod json;
pub mod notifier;
pub mod routes;
pub mod snapshot;

pub use config::{Args, ServerConfig};
pub use error::{AppError, Error};
pub use notifier::{Listener, Notifier, Signal};
pub use snapshot::{Credentials, HttpSnapshotSource, SnapshotSource};

use std::sync::Arc;

use axum::Router;
use livequery_core::{ChangeLog, DependencyResolver, SchemaRegistry};
use tower_http::cors::{Any, CorsLayer};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Topic registry and change notifier.
    pub notifier: Arc<Notifier>,
    /// Snapshot recomputation, `None` when snapshot mode is unavailable.
    pub snapshots: Option<Arc<dyn SnapshotSource>>,
    /// Server configuration.
    pub config: ServerConfig,
    /// Cancelled on shutdown to end open live streams.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create new application state.
    pub fn new(notifier: Arc<Notifier>, config: ServerConfig) -> Self {
        Self {
            notifier,
            snapshots: None,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Serve snapshot-mode topics from the given source.
    pub fn with_snapshot_source(mut self, source: Arc<dyn SnapshotSource>) -> Self {
        self.snapshots = Some(source);
        self
    }
}

/// Open storage, load the schema and assemble the application state.
pub fn build_state(config: &ServerConfig) -> Result<AppState, Error> {
    let db = sled::open(&config.data_path)?;
    let changelog = Arc::new(ChangeLog::open(&db)?);

    let registry = match &config.schema_path {
        Some(path) => {
            let registry = SchemaRegistry::from_json_file(path)?;
            tracing::info!(
                schema = %path.display(),
                collections = registry.collection_count(),
                globals = registry.global_count(),
                "schema loaded"
            );
            registry
        }
        None => {
            tracing::warn!("no schema configured, only relation-free topics can be resolved");
            SchemaRegistry::new()
        }
    };

    let resolver = DependencyResolver::new(Arc::new(registry)).with_max_depth(config.max_depth);
    let notifier = Arc::new(Notifier::new(changelog, resolver));
    let mut state = AppState::new(notifier, config.clone());

    if let Some(upstream) = &config.snapshot_upstream {
        let source = HttpSnapshotSource::new(upstream, config.snapshot_timeout)?;
        tracing::info!(upstream = %upstream, "snapshot mode enabled");
        state = state.with_snapshot_source(Arc::new(source));
    }

    Ok(state)
}

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::routes())
        .merge(routes::changes::routes())
        .merge(routes::live::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
