//! Runner-facing routes.
//!
//! Authenticated JSON over POST with `Authorization: Bearer <opaque>`.
//! Business-level success/failure rides in the body with status 200; shape
//! errors are 400, unusable tokens 401, and a metadata sync during project
//! deletion 409.

use axum::extract::State;
use axum::http::request::Parts;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use clawlets_core::{
    CompletionSlot, EngineError, MetadataSyncCounts, MetadataSyncRequest, RunnerIdentity,
};
use clawlets_store::models::{Job, JobStatus, RunnerCapabilities};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Bearer credential pulled from the `Authorization` header.
pub struct BearerToken(pub String);

impl<S> axum::extract::FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ApiError(EngineError::Unauthorized(
                    "missing Authorization header".to_owned(),
                ))
            })?;
        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            ApiError(EngineError::Unauthorized(
                "Authorization header must use Bearer scheme".to_owned(),
            ))
        })?;
        Ok(Self(token.to_owned()))
    }
}

/// Build the runner router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/runner/heartbeat", post(heartbeat))
        .route("/runner/jobs/lease-next", post(lease_next))
        .route("/runner/jobs/heartbeat", post(job_heartbeat))
        .route("/runner/jobs/complete", post(job_complete))
        .route("/runner/run-events/append-batch", post(append_run_events))
        .route("/runner/metadata/sync", post(metadata_sync))
}

async fn authenticate(
    state: &AppState,
    token: &str,
    project_id: Uuid,
) -> Result<RunnerIdentity, ApiError> {
    Ok(state
        .engine
        .authenticate_runner(token, Some(project_id))
        .await?)
}

// ── Heartbeat ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatRequest {
    project_id: Uuid,
    runner_name: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    capabilities: Option<RunnerCapabilities>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatResponse {
    ok: bool,
    runner_id: Uuid,
}

/// `POST /runner/heartbeat` — refresh liveness and capability record.
async fn heartbeat(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(body): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let identity = authenticate(&state, &token, body.project_id).await?;
    let runner = state
        .engine
        .runner_heartbeat(
            &identity,
            &body.runner_name,
            body.version.as_deref(),
            body.capabilities,
        )
        .await?;
    Ok(Json(HeartbeatResponse {
        ok: true,
        runner_id: runner.id,
    }))
}

// ── Lease next ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaseNextRequest {
    project_id: Uuid,
    #[serde(default)]
    lease_ttl_ms: Option<i64>,
}

/// The job envelope handed to a runner at lease time.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobEnvelope {
    job_id: Uuid,
    run_id: Uuid,
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_meta: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_runner_id: Option<Uuid>,
    sealed_input_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    sealed_input_b64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sealed_input_alg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sealed_input_key_id: Option<String>,
    attempt: i64,
    lease_id: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobEnvelope {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            run_id: job.run_id,
            kind: job.kind,
            payload_meta: job.payload_meta,
            target_runner_id: job.target_runner_id,
            sealed_input_required: job.sealed_input_required,
            sealed_input_b64: job.sealed_input_b64,
            sealed_input_alg: job.sealed_input_alg,
            sealed_input_key_id: job.sealed_input_key_id,
            attempt: job.attempt,
            lease_id: job.lease_id,
            lease_expires_at: job.lease_expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct LeaseNextResponse {
    job: Option<JobEnvelope>,
}

/// `POST /runner/jobs/lease-next` — claim the oldest eligible job.
async fn lease_next(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(body): Json<LeaseNextRequest>,
) -> Result<Json<LeaseNextResponse>, ApiError> {
    let identity = authenticate(&state, &token, body.project_id).await?;
    let job = state.engine.lease_next(&identity, body.lease_ttl_ms).await?;
    Ok(Json(LeaseNextResponse {
        job: job.map(JobEnvelope::from),
    }))
}

// ── Job heartbeat / complete ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobHeartbeatRequest {
    project_id: Uuid,
    job_id: Uuid,
    lease_id: String,
    #[serde(default)]
    lease_ttl_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
struct JobOutcomeResponse {
    ok: bool,
    status: String,
}

/// `POST /runner/jobs/heartbeat` — extend a held lease.
async fn job_heartbeat(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(body): Json<JobHeartbeatRequest>,
) -> Result<Json<JobOutcomeResponse>, ApiError> {
    authenticate(&state, &token, body.project_id).await?;
    let outcome = state
        .engine
        .job_heartbeat(body.job_id, &body.lease_id, body.lease_ttl_ms)
        .await?;
    Ok(Json(JobOutcomeResponse {
        ok: outcome.ok,
        status: outcome.status,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobCompleteRequest {
    project_id: Uuid,
    job_id: Uuid,
    lease_id: String,
    status: JobStatus,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    command_result_json: Option<serde_json::Value>,
    #[serde(default)]
    command_result_large_storage_id: Option<String>,
    #[serde(default)]
    command_result_large_size: Option<i64>,
}

/// `POST /runner/jobs/complete` — finish a held job.
async fn job_complete(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(body): Json<JobCompleteRequest>,
) -> Result<Json<JobOutcomeResponse>, ApiError> {
    authenticate(&state, &token, body.project_id).await?;

    let result = match (
        body.command_result_json,
        body.command_result_large_storage_id,
    ) {
        (Some(_), Some(_)) => {
            return Err(ApiError(EngineError::Conflict(
                "provide either a small or a large result, not both".to_owned(),
            )));
        }
        (Some(json), None) => Some(CompletionSlot::Json(json)),
        (None, Some(storage_id)) => {
            let size = body.command_result_large_size.ok_or_else(|| {
                ApiError(EngineError::Conflict(
                    "size is required with a large result".to_owned(),
                ))
            })?;
            Some(CompletionSlot::Blob { storage_id, size })
        }
        (None, None) => None,
    };

    let outcome = state
        .engine
        .complete_job(
            body.job_id,
            &body.lease_id,
            body.status,
            body.error_message.as_deref(),
            result,
        )
        .await?;
    Ok(Json(JobOutcomeResponse {
        ok: outcome.ok,
        status: outcome.status,
    }))
}

// ── Run events ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendRunEventsRequest {
    project_id: Uuid,
    run_id: Uuid,
    events: Vec<clawlets_core::validate::RunEventInput>,
}

#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

/// `POST /runner/run-events/append-batch` — append sanitized run events.
async fn append_run_events(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(body): Json<AppendRunEventsRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let identity = authenticate(&state, &token, body.project_id).await?;
    state
        .engine
        .append_run_events(&identity, body.run_id, &body.events)
        .await?;
    Ok(Json(OkResponse { ok: true }))
}

// ── Metadata sync ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataSyncBody {
    project_id: Uuid,
    #[serde(flatten)]
    request: MetadataSyncRequest,
}

#[derive(Debug, Serialize)]
struct MetadataSyncResponse {
    ok: bool,
    synced: MetadataSyncCounts,
}

/// `POST /runner/metadata/sync` — sanitize and upsert runner-reported
/// metadata. Conflicts (409) while the project is being erased.
async fn metadata_sync(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(body): Json<MetadataSyncBody>,
) -> Result<Json<MetadataSyncResponse>, ApiError> {
    let identity = authenticate(&state, &token, body.project_id).await?;
    let synced = state
        .engine
        .sync_runner_metadata(&identity, &body.request)
        .await?;
    Ok(Json(MetadataSyncResponse { ok: true, synced }))
}
