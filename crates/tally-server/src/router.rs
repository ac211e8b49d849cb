use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use tally_metrics::PrometheusRegistry;
use tally_ring::ShardRing;
use tally_types::ResourceKind;

use crate::handler;

/// Shared, read-only handles the handlers need.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<PrometheusRegistry>,
    pub ring: Arc<ShardRing>,
    pub kinds: Arc<[ResourceKind]>,
}

impl AppState {
    pub fn new(
        registry: Arc<PrometheusRegistry>,
        ring: Arc<ShardRing>,
        kinds: impl Into<Arc<[ResourceKind]>>,
    ) -> Self {
        Self {
            registry,
            ring,
            kinds: kinds.into(),
        }
    }
}

/// Build the axum router with all tally endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(handler::metrics_handler))
        .route("/healthz", get(handler::health_handler))
        .route("/readyz", get(handler::ready_handler))
        .route("/v1/info", get(handler::info_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
