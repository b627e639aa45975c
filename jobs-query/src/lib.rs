//! Jobs Query Service Library
//!
//! This library provides the components of the jobs read service: the
//! InfluxDB query client, the fail-fast collection pipeline, and the HTTP
//! handlers that serve it.

// Core modules
pub mod config;
pub mod handlers;
pub mod influx;
pub mod metrics;
pub mod pipeline;
pub mod testing;

use std::sync::Arc;

use jobs_core::QueryClient;

// Re-export commonly used types
pub use config::QueryConfig;
pub use pipeline::{JobsPipeline, QueryExecutor};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<JobsPipeline>,
    pub config: Arc<QueryConfig>,
    pub metrics: Arc<metrics::QueryMetricsCollector>,
}

impl AppState {
    /// Wire the pipeline on top of an existing store client
    pub fn new(client: Arc<dyn QueryClient>, config: Arc<QueryConfig>) -> Self {
        let executor = QueryExecutor::new(client, config.query.clone());
        let pipeline = JobsPipeline::new(executor, config.limits.query_timeout());

        Self {
            pipeline: Arc::new(pipeline),
            config,
            metrics: Arc::new(metrics::QueryMetricsCollector::new()),
        }
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> axum::Router {
    use crate::handlers::*;
    use axum::routing::get;
    use tower::ServiceBuilder;
    use tower_http::{cors::CorsLayer, trace::TraceLayer};

    let mut router = axum::Router::new()
        .route("/health", get(health_handler))
        .route("/jobs", get(jobs_handler));

    if state.config.metrics.enable_prometheus {
        router = router.route(&state.config.metrics.metrics_path, get(metrics_handler));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
