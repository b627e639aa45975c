use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use jobs_core::{JobList, JobsError};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{metrics::QueryTimer, AppState};

/// Health check endpoint
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "jobs-query",
        "version": jobs_core::VERSION,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics.prometheus_format()
}

/// `GET /jobs`: run the jobs query and return every job, or a single error
pub async fn jobs_handler(State(state): State<AppState>) -> Response {
    // On client disconnect axum drops this future, and with it the
    // collection, which closes the cursor and the store response.
    let cancel = CancellationToken::new();

    let timer = QueryTimer::start();
    let outcome = match state.pipeline.collect(&cancel).await {
        Ok(jobs) => encode_jobs(&jobs).map(|body| (jobs.len(), body)),
        Err(err) => Err(("Error getting jobs", err)),
    };

    let elapsed = timer.finish(&state.metrics, state.config.metrics.slow_query_threshold_ms);
    if elapsed.as_millis() as u64 > state.config.metrics.slow_query_threshold_ms {
        warn!(elapsed_ms = elapsed.as_millis() as u64, "Slow jobs query");
    }

    match outcome {
        Ok((count, body)) => {
            state.metrics.record_jobs(count);
            info!(jobs = count, "Returned jobs");
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response()
        }
        Err((context, err)) => {
            state.metrics.record_error(&err);
            error_response(context, &err)
        }
    }
}

fn encode_jobs(jobs: &JobList) -> Result<Vec<u8>, (&'static str, JobsError)> {
    serde_json::to_vec(jobs).map_err(|err| ("Error marshalling jobs", JobsError::from(err)))
}

fn error_response(context: &str, err: &JobsError) -> Response {
    error!(error = %err, category = err.category(), "{}", context);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": format!("{}: {}", context, err)
        })),
    )
        .into_response()
}
