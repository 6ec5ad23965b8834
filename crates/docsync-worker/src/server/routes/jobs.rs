//! Job enqueue and inspection endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::processing::{JobRecord, QueueStats};
use crate::server::state::AppState;
use crate::types::IngestionBatchJob;

/// Response from enqueueing a job
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub job_id: String,
    pub sync_id: String,
    pub items_queued: usize,
}

/// Queue statistics with the backend name
#[derive(Debug, Serialize)]
pub struct QueueStatsResponse {
    pub backend: String,
    #[serde(flatten)]
    pub stats: QueueStats,
}

/// POST /api/jobs - Enqueue a batch job
pub async fn enqueue_job(
    State(state): State<AppState>,
    Json(job): Json<IngestionBatchJob>,
) -> Result<(StatusCode, Json<EnqueueResponse>)> {
    let sync_id = job.sync_id.clone();
    let items_queued = job.payloads.len();
    let job_id = state.queue().enqueue(job).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id,
            sync_id,
            items_queued,
        }),
    ))
}

/// GET /api/jobs/:id - Job record
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobRecord>> {
    state
        .queue()
        .record(&job_id)
        .await?
        .map(Json)
        .ok_or(Error::JobNotFound(job_id))
}

/// GET /api/queue/stats - Job counts by status
pub async fn queue_stats(State(state): State<AppState>) -> Result<Json<QueueStatsResponse>> {
    let stats = state.queue().stats().await?;
    Ok(Json(QueueStatsResponse {
        backend: state.queue().name().to_string(),
        stats,
    }))
}
