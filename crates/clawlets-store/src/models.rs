//! Domain row types for the Clawlets control plane.
//!
//! Every table the engine touches has a row type here. All IDs are UUIDs
//! minted at insert time; all timestamps are `DateTime<Utc>`. Secret-bearing
//! columns only ever hold sealed (client-encrypted) envelopes or SHA-256
//! hashes — the control plane never stores plaintext secrets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Projects ─────────────────────────────────────────────────────────

/// Lifecycle status of a project (tenant root).
///
/// `Creating` is the only status the run/project projector may leave —
/// once a project is `Ready` or `Error` it is never moved back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Creating,
    Ready,
    Error,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Ready => write!(f, "ready"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// How a project's workloads execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Work runs on the operator's machine; the workspace is a local path.
    Local,
    /// Work runs on authenticated remote runners.
    RemoteRunner,
}

/// Workspace reference, tagged to match the execution mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WorkspaceRef {
    /// Hash of a local workspace path (mode `local`).
    Local { path_hash: String },
    /// Git remote plus optional subpath (mode `remote_runner`).
    Git { remote: String, subpath: Option<String> },
}

/// A project — the tenant root that owns every other row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    /// Opaque authenticated principal that owns the project.
    pub owner_id: String,
    /// Human name, unique per owner.
    pub name: String,
    pub execution_mode: ExecutionMode,
    pub workspace: WorkspaceRef,
    /// Present iff `execution_mode == Local`.
    pub local_path: Option<String>,
    /// Present iff `execution_mode == RemoteRunner`.
    pub runner_repo_path: Option<String>,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Role of a project member. Mutating operations require `Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Viewer,
}

impl std::fmt::Display for MemberRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Admin => write!(f, "admin"),
            Self::Viewer => write!(f, "viewer"),
        }
    }
}

/// Membership row granting a principal access to a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMember {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: String,
    pub role: MemberRole,
    pub created_at: DateTime<Utc>,
}

// ── Runners ──────────────────────────────────────────────────────────

/// Last observed liveness of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerStatus {
    Online,
    Offline,
}

/// Capability record a runner reports on heartbeat.
///
/// The sealed-input triple (`alg`, `public_key_spki`, `key_id`) must be
/// complete before the runner can receive sealed jobs; `key_id` is derived
/// server-side as base64url(SHA-256(SPKI bytes)).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerCapabilities {
    #[serde(default)]
    pub supports_sealed_input: bool,
    #[serde(default)]
    pub sealed_input_alg: Option<String>,
    /// Base64url-encoded SPKI public key bytes.
    #[serde(default)]
    pub sealed_input_public_key_spki: Option<String>,
    /// base64url(SHA-256(SPKI bytes)).
    #[serde(default)]
    pub sealed_input_key_id: Option<String>,
    #[serde(default)]
    pub supports_infra_apply: bool,
    #[serde(default)]
    pub nix_available: bool,
}

/// A long-lived worker identity within a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Unique per project.
    pub name: String,
    pub version: Option<String>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub last_status: RunnerStatus,
    pub capabilities: RunnerCapabilities,
    pub created_at: DateTime<Utc>,
}

/// Opaque bearer token bound to `(project, runner)`.
///
/// Only the SHA-256 hex digest of the token is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerToken {
    pub id: Uuid,
    pub project_id: Uuid,
    pub runner_id: Uuid,
    pub token_hash: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ── Runs ─────────────────────────────────────────────────────────────

/// User-facing status of a run. Terminal statuses are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl RunStatus {
    /// Whether this status admits no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

/// A user-facing unit of work; owns one or more jobs.
///
/// `kind` is an open enum of deployment phases (`project_init`,
/// `project_import`, `host_deploy`, `infra_apply`, `custom`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub project_id: Uuid,
    pub kind: String,
    pub status: RunStatus,
    pub title: Option<String>,
    pub host: Option<String>,
    /// Principal that started the run.
    pub initiator: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Jobs ─────────────────────────────────────────────────────────────

/// Status of a single executable step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    SealedPending,
    Leased,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    /// Whether this status admits no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::SealedPending => "sealed_pending",
            Self::Leased => "leased",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        write!(f, "{s}")
    }
}

/// A single executable step belonging to a run.
///
/// Lease fields (`lease_id`, `leased_by_runner_id`, `lease_expires_at`) are
/// present iff the status is `leased` or `running`; sealed-input fields are
/// present iff `sealed_input_required`. On a terminal transition the payload,
/// sealed ciphertext, and lease fields are all cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub project_id: Uuid,
    pub run_id: Uuid,
    /// Immutable after insert; matches `^[A-Za-z0-9._-]+$`.
    pub kind: String,
    /// Non-secret metadata for the runner. Secret-like keys are rejected
    /// before insert.
    pub payload_meta: Option<serde_json::Value>,
    /// SHA-256 hex of the canonical JSON payload, when a payload is present.
    pub payload_hash: Option<String>,
    pub target_runner_id: Option<Uuid>,
    pub sealed_input_required: bool,
    pub sealed_input_b64: Option<String>,
    pub sealed_input_alg: Option<String>,
    pub sealed_input_key_id: Option<String>,
    pub sealed_pending_expires_at: Option<DateTime<Utc>>,
    pub lease_id: Option<String>,
    pub leased_by_runner_id: Option<Uuid>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Monotonically non-decreasing, capped at 25.
    pub attempt: i64,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ── Command results ──────────────────────────────────────────────────

/// Small JSON result envelope for a completed job (≤ 512 KiB).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub id: Uuid,
    pub project_id: Uuid,
    pub run_id: Uuid,
    pub job_id: Uuid,
    pub json: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Storage-backed result blob for a completed job (≤ 5 MiB).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResultBlob {
    pub id: Uuid,
    pub project_id: Uuid,
    pub run_id: Uuid,
    pub job_id: Uuid,
    /// Opaque id in the blob store.
    pub storage_id: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Set on first successful take; consumed rows read as absent.
    pub consumed_at: Option<DateTime<Utc>>,
}

// ── Run events ───────────────────────────────────────────────────────

/// Severity of a runner-reported run event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Closed set of deployment phases a run event may tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseTag {
    Build,
    Upload,
    Switch,
    Verify,
    Cleanup,
}

/// Optional structured metadata on a run event — either a phase tag from
/// the closed set or a process exit code in `[-1, 255]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RunEventMeta {
    Phase { phase: PhaseTag },
    Exit { code: i32 },
}

/// A single log line reported by a runner, sanitized before storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub id: Uuid,
    pub project_id: Uuid,
    pub run_id: Uuid,
    pub ts: DateTime<Utc>,
    pub level: EventLevel,
    pub message: String,
    pub meta: Option<RunEventMeta>,
}

// ── Audit log ────────────────────────────────────────────────────────

/// Append-only record of a privileged operator action.
///
/// `action`, `target`, and `data` are validated against the closed taxonomy
/// in `clawlets-core::audit` before insert; this row stores the normalized
/// shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub user_id: String,
    pub project_id: Option<Uuid>,
    pub action: String,
    pub target: Option<serde_json::Value>,
    pub data: Option<serde_json::Value>,
}

// ── Retention ────────────────────────────────────────────────────────

/// Per-project retention policy; drives the metered GC sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectPolicy {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Clamped to `[1, 365]` when applied.
    pub retention_days: i64,
    pub updated_at: DateTime<Utc>,
}

/// Persistent singleton remembering where the last retention pass stopped.
///
/// `lease_id`/`lease_expires_at` form the mutual-exclusion stamp: a sweeper
/// must read back its own lease after acquiring and abort if it changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionSweep {
    pub key: String,
    /// Project id of the last policy processed.
    pub cursor: Option<Uuid>,
    pub lease_id: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

// ── Erasure ──────────────────────────────────────────────────────────

/// Status of a tenant-scoped erasure job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletionJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl DeletionJobStatus {
    /// Whether the job will make no further progress.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Staged deletion driven by a two-phase start+confirm token.
///
/// `stage` walks the fixed table order ending at `project` then `done`;
/// `processed` accumulates deleted row counts across steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionJob {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Principal that confirmed the deletion; may read status after the
    /// project row is gone.
    pub requested_by: String,
    pub status: DeletionJobStatus,
    /// Current stage name (see `clawlets-core::erasure::ErasureStage`).
    pub stage: String,
    pub processed: i64,
    pub lease_id: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One-shot hashed deletion token, TTL 15 minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionToken {
    pub id: Uuid,
    pub project_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// ── Rate limiting ────────────────────────────────────────────────────

/// Fixed-window counter row keyed by `(principal, operation)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRow {
    pub key: String,
    pub window_start: DateTime<Utc>,
    pub count: i64,
}

// ── Runner-reported metadata ─────────────────────────────────────────

/// Sanitized summary of a host's desired state, reported by a runner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSummary {
    /// Clipped to `[0, 10_000]`.
    pub service_count: i64,
    /// Clipped to `[0, 10_000]`.
    pub container_count: i64,
    /// Each in `[1, 65_535]`; at most 256 entries.
    pub open_ports: Vec<u16>,
    /// At most 256 entries, each bounded.
    pub roles: Vec<String>,
}

/// A host row upserted by metadata sync, keyed `(project, host_name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub host_name: String,
    pub summary: HostSummary,
    pub reported_at: DateTime<Utc>,
}

/// Sanitized summary of a gateway's desired state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySummary {
    pub endpoint_count: i64,
    pub listen_ports: Vec<u16>,
    pub networks: Vec<String>,
}

/// A gateway row upserted by metadata sync, keyed
/// `(project, host_name, gateway_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub host_name: String,
    pub gateway_id: String,
    pub summary: GatewaySummary,
    pub reported_at: DateTime<Utc>,
}

/// A config-sync row upserted by metadata sync, keyed `(project, name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfigRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    /// SHA-256 hex of the config content as the runner sees it.
    pub content_hash: String,
    pub reported_at: DateTime<Utc>,
}

/// A secret-wiring row upserted by metadata sync, keyed
/// `(project, host_name, secret_name)`. Records where a secret is mounted —
/// never the secret itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretWiringRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub host_name: String,
    pub secret_name: String,
    pub target_path: String,
    pub reported_at: DateTime<Utc>,
}

// ── Providers & credentials ──────────────────────────────────────────

/// An infrastructure provider registration for a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRow {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub kind: String,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A sealed credential envelope owned by a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectCredential {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub sealed_value_b64: String,
    pub created_at: DateTime<Utc>,
}

// ── Setup drafts ─────────────────────────────────────────────────────

/// Lifecycle of a setup draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftStatus {
    Draft,
    Committing,
    Committed,
    Failed,
}

/// One sealed section of a setup draft with its own expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSection {
    pub sealed_b64: String,
    pub alg: String,
    pub key_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Pending-configuration scratchpad per `(project, host)`.
///
/// `version` is an optimistic counter: writes must present the current
/// version or fail with a conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupDraft {
    pub id: Uuid,
    pub project_id: Uuid,
    pub host_name: String,
    pub deploy_creds: Option<DraftSection>,
    pub bootstrap_secrets: Option<DraftSection>,
    pub version: i64,
    pub status: DraftStatus,
    pub updated_at: DateTime<Utc>,
}
