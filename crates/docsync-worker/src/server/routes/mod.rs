//! API routes for enqueueing and inspecting ingestion jobs

pub mod jobs;

use axum::{
    routing::{get, post},
    Router,
};

use crate::server::state::AppState;
use crate::types::IngestionBatchJob;

/// Build all API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(jobs::enqueue_job))
        .route("/jobs/:id", get(jobs::get_job))
        .route("/queue/stats", get(jobs::queue_stats))
        .route("/info", get(info))
}

/// API info endpoint
async fn info() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "name": "docsync-worker",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Document ingestion worker: storage files to vector index chunks",
        "job": IngestionBatchJob::JOB_NAME,
        "endpoints": {
            "POST /api/jobs": "Enqueue a batch of files for sync",
            "GET /api/jobs/:id": "Job record with per-file outcome",
            "GET /api/queue/stats": "Job counts by status"
        }
    }))
}
