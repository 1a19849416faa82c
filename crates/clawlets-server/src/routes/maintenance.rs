//! Maintenance routes, mounted only when `CLAWLETS_MAINTENANCE_ENABLED=1`.
//!
//! These trigger destructive housekeeping directly and exist for operators
//! and deploy tooling; disabled deployments answer 404.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use clawlets_core::RetentionSummary;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Build the maintenance router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/maintenance/retention/sweep", post(retention_sweep))
        .route("/maintenance/results/purge", post(results_purge))
        .route("/maintenance/erasure/step", post(erasure_step))
}

/// `POST /maintenance/retention/sweep` — run one sweep pass now.
async fn retention_sweep(
    State(state): State<AppState>,
) -> Result<Json<RetentionSummary>, ApiError> {
    let summary = state
        .engine
        .run_retention_sweep(Some("maintenance"), None)
        .await?;
    Ok(Json(summary))
}

#[derive(Debug, Serialize)]
struct PurgeResponse {
    deleted: u64,
}

/// `POST /maintenance/results/purge` — drop expired result rows.
async fn results_purge(State(state): State<AppState>) -> Result<Json<PurgeResponse>, ApiError> {
    let deleted = state.engine.purge_expired_results(500).await?;
    Ok(Json(PurgeResponse { deleted }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErasureStepRequest {
    deletion_job_id: Uuid,
}

#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

/// `POST /maintenance/erasure/step` — drive one step of a stuck erasure
/// job (the scheduler normally does this).
async fn erasure_step(
    State(state): State<AppState>,
    Json(body): Json<ErasureStepRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    state.engine.run_deletion_job_step(body.deletion_job_id).await?;
    Ok(Json(OkResponse { ok: true }))
}
