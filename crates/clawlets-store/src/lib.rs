//! Storage layer for the Clawlets control plane.
//!
//! This crate defines the [`Store`] trait — the typed document-store
//! interface the scheduler engine consumes — plus the [`BlobStore`] seam for
//! large result payloads. Backends implement the indexed queries the engine
//! needs; the engine never sees SQL or key encodings.
//!
//! Two implementations are provided:
//!
//! - [`MemoryStore`] / [`MemoryBlobStore`] — in-memory, for development and
//!   tests. Every method is atomic under a single writer lock, which gives
//!   the engine the snapshot semantics it expects from a real database.
//! - `PgStore` — PostgreSQL via sqlx (feature `postgres-backend`).
//!   Conditional transitions compile to single `UPDATE ... WHERE` statements
//!   so the at-most-one-executor invariant holds across processes.

mod blob;
mod error;
mod memory;
pub mod models;
#[cfg(feature = "postgres-backend")]
mod postgres;

pub use blob::{BlobStore, MemoryBlobStore};
pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "postgres-backend")]
pub use postgres::PgStore;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use models::{
    AuditLogEntry, CommandResult, CommandResultBlob, DeletionJob, DeletionToken, GatewayRow,
    HostRow, Job, JobStatus, Project, ProjectConfigRow, ProjectCredential, ProjectMember,
    ProjectPolicy, ProjectStatus, ProviderRow, RateLimitRow, RetentionSweep, Run, RunEvent,
    RunStatus, Runner, RunnerCapabilities, RunnerStatus, RunnerToken, SecretWiringRow, SetupDraft,
};

/// Typed document-store interface consumed by the engine.
///
/// Mutating methods that return `bool` report whether a row was touched;
/// methods that return `Option<Job>` are conditional transitions that only
/// fire when the stored row still satisfies the stated precondition, and
/// return the updated row when they do. Backends must make each method
/// atomic — the engine relies on that for its lease invariants.
#[async_trait::async_trait]
pub trait Store: Send + Sync + 'static {
    // ── Projects ─────────────────────────────────────────────────────

    /// Insert a project. Fails with [`StoreError::Duplicate`] when the owner
    /// already has a project of the same name.
    async fn insert_project(&self, project: &Project) -> Result<(), StoreError>;

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, StoreError>;

    async fn set_project_status(
        &self,
        id: Uuid,
        status: ProjectStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn delete_project(&self, id: Uuid) -> Result<bool, StoreError>;

    // ── Members ──────────────────────────────────────────────────────

    async fn insert_member(&self, member: &ProjectMember) -> Result<(), StoreError>;

    async fn get_member(
        &self,
        project_id: Uuid,
        user_id: &str,
    ) -> Result<Option<ProjectMember>, StoreError>;

    async fn purge_members(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError>;

    // ── Runners ──────────────────────────────────────────────────────

    async fn insert_runner(&self, runner: &Runner) -> Result<(), StoreError>;

    async fn get_runner(&self, id: Uuid) -> Result<Option<Runner>, StoreError>;

    async fn get_runner_by_name(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<Option<Runner>, StoreError>;

    async fn update_runner_heartbeat(
        &self,
        id: Uuid,
        last_seen_at: DateTime<Utc>,
        version: Option<&str>,
        capabilities: &RunnerCapabilities,
    ) -> Result<bool, StoreError>;

    async fn set_runner_status(&self, id: Uuid, status: RunnerStatus) -> Result<bool, StoreError>;

    async fn purge_runners(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError>;

    // ── Runner tokens ────────────────────────────────────────────────

    async fn insert_runner_token(&self, token: &RunnerToken) -> Result<(), StoreError>;

    async fn get_runner_token(&self, id: Uuid) -> Result<Option<RunnerToken>, StoreError>;

    async fn get_runner_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RunnerToken>, StoreError>;

    async fn touch_runner_token(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn revoke_runner_token(&self, id: Uuid, now: DateTime<Utc>)
    -> Result<bool, StoreError>;

    async fn purge_runner_tokens(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError>;

    // ── Runs ─────────────────────────────────────────────────────────

    async fn insert_run(&self, run: &Run) -> Result<(), StoreError>;

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, StoreError>;

    /// Clear `finished_at`/`error_message` and set status back to `queued`.
    async fn reset_run_to_queued(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn mark_run_running(
        &self,
        id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn mark_run_terminal(
        &self,
        id: Uuid,
        status: RunStatus,
        finished_at: DateTime<Utc>,
        error_message: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Terminal runs with `started_at < cutoff`, oldest first.
    async fn list_terminal_runs_started_before(
        &self,
        project_id: Uuid,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Run>, StoreError>;

    async fn delete_run(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn purge_runs(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError>;

    // ── Jobs ─────────────────────────────────────────────────────────

    async fn insert_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Jobs in `status` for the project, oldest first.
    async fn list_jobs_by_status(
        &self,
        project_id: Uuid,
        status: JobStatus,
        limit: u32,
    ) -> Result<Vec<Job>, StoreError>;

    /// Queued jobs ordered by `created_at` ascending. With
    /// `target = Some(runner)` only jobs targeted at that runner; with
    /// `target = None` only untargeted jobs.
    async fn list_queued_jobs(
        &self,
        project_id: Uuid,
        target: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<Job>, StoreError>;

    /// Claim a queued job: iff `status == queued`, set `leased`, write the
    /// lease triple, bump `attempt`, and default `started_at` to `now`.
    async fn lease_queued_job(
        &self,
        id: Uuid,
        runner_id: Uuid,
        lease_id: &str,
        lease_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError>;

    /// Iff the lease id matches and status is `leased`/`running` with a
    /// lease expiry on record: set `running` and extend the expiry.
    async fn extend_job_lease(
        &self,
        id: Uuid,
        lease_id: &str,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError>;

    /// Iff the lease id matches and status is `leased`/`running`: set the
    /// terminal status and clear payload, sealed ciphertext, and lease
    /// fields.
    async fn complete_leased_job(
        &self,
        id: Uuid,
        lease_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError>;

    /// Iff the lease id matches: back to `queued` with lease fields cleared
    /// (attempt unchanged).
    async fn requeue_leased_job(&self, id: Uuid, lease_id: &str) -> Result<bool, StoreError>;

    /// Iff non-terminal: set `failed`, clear payload/sealed/lease fields.
    async fn fail_job(
        &self,
        id: Uuid,
        error_message: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError>;

    /// Iff non-terminal: set `canceled`, clear payload/sealed/lease fields
    /// and any error message.
    async fn cancel_job(&self, id: Uuid, finished_at: DateTime<Utc>)
    -> Result<Option<Job>, StoreError>;

    /// Iff `status == sealed_pending`: store the ciphertext, set `queued`,
    /// clear the reservation deadline.
    async fn finalize_sealed_job(
        &self,
        id: Uuid,
        sealed_input_b64: &str,
    ) -> Result<Option<Job>, StoreError>;

    async fn purge_jobs(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError>;

    // ── Command results ──────────────────────────────────────────────

    async fn insert_command_result(&self, row: &CommandResult) -> Result<(), StoreError>;

    async fn insert_command_result_blob(&self, row: &CommandResultBlob)
    -> Result<(), StoreError>;

    async fn list_command_results(&self, job_id: Uuid) -> Result<Vec<CommandResult>, StoreError>;

    async fn list_command_result_blobs(
        &self,
        job_id: Uuid,
    ) -> Result<Vec<CommandResultBlob>, StoreError>;

    async fn delete_command_result(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn delete_command_result_blob(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn mark_blob_consumed(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn purge_expired_command_results(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<u64, StoreError>;

    /// Deletes expired blob rows and returns their backing storage ids so
    /// the caller can clean the blob store best-effort.
    async fn purge_expired_command_result_blobs(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<String>, StoreError>;

    async fn purge_command_results(&self, project_id: Uuid, limit: u32)
    -> Result<u64, StoreError>;

    async fn purge_command_result_blobs(
        &self,
        project_id: Uuid,
        limit: u32,
    ) -> Result<Vec<String>, StoreError>;

    // ── Run events ───────────────────────────────────────────────────

    async fn insert_run_events(&self, events: &[RunEvent]) -> Result<(), StoreError>;

    async fn list_run_events(&self, run_id: Uuid, limit: u32) -> Result<Vec<RunEvent>, StoreError>;

    async fn delete_run_events_before(
        &self,
        project_id: Uuid,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<u64, StoreError>;

    async fn delete_run_events_for_run(&self, run_id: Uuid, limit: u32)
    -> Result<u64, StoreError>;

    async fn purge_run_events(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError>;

    // ── Audit log ────────────────────────────────────────────────────

    async fn insert_audit(&self, entry: &AuditLogEntry) -> Result<(), StoreError>;

    /// Newest-first page of audit entries for a project.
    async fn list_audit(
        &self,
        project_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<AuditLogEntry>, StoreError>;

    async fn delete_audit_before(
        &self,
        project_id: Uuid,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<u64, StoreError>;

    async fn purge_audit_logs(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError>;

    // ── Retention policies & sweep cursor ────────────────────────────

    async fn upsert_policy(&self, policy: &ProjectPolicy) -> Result<(), StoreError>;

    async fn get_policy(&self, project_id: Uuid) -> Result<Option<ProjectPolicy>, StoreError>;

    /// Policies ordered by project id, strictly after the cursor.
    async fn list_policies_after(
        &self,
        cursor: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<ProjectPolicy>, StoreError>;

    async fn purge_policies(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError>;

    async fn get_retention_sweep(&self, key: &str) -> Result<Option<RetentionSweep>, StoreError>;

    async fn put_retention_sweep(&self, sweep: &RetentionSweep) -> Result<(), StoreError>;

    // ── Erasure ──────────────────────────────────────────────────────

    async fn insert_deletion_token(&self, token: &DeletionToken) -> Result<(), StoreError>;

    async fn list_deletion_tokens(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<DeletionToken>, StoreError>;

    async fn delete_deletion_tokens(&self, project_id: Uuid) -> Result<u64, StoreError>;

    async fn purge_deletion_tokens(&self, project_id: Uuid, limit: u32)
    -> Result<u64, StoreError>;

    async fn insert_deletion_job(&self, job: &DeletionJob) -> Result<(), StoreError>;

    async fn get_deletion_job(&self, id: Uuid) -> Result<Option<DeletionJob>, StoreError>;

    /// The `pending`/`running` erasure job for a project, if any.
    async fn get_active_deletion_job(
        &self,
        project_id: Uuid,
    ) -> Result<Option<DeletionJob>, StoreError>;

    async fn get_latest_deletion_job(
        &self,
        project_id: Uuid,
    ) -> Result<Option<DeletionJob>, StoreError>;

    async fn update_deletion_job(&self, job: &DeletionJob) -> Result<bool, StoreError>;

    // ── Rate limiting ────────────────────────────────────────────────

    async fn get_rate_limit(&self, key: &str) -> Result<Option<RateLimitRow>, StoreError>;

    async fn put_rate_limit(&self, row: &RateLimitRow) -> Result<(), StoreError>;

    // ── Runner-reported metadata ─────────────────────────────────────

    async fn upsert_host(&self, row: &HostRow) -> Result<(), StoreError>;

    async fn list_hosts(&self, project_id: Uuid) -> Result<Vec<HostRow>, StoreError>;

    async fn purge_hosts(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError>;

    async fn upsert_gateway(&self, row: &GatewayRow) -> Result<(), StoreError>;

    async fn list_gateways(&self, project_id: Uuid) -> Result<Vec<GatewayRow>, StoreError>;

    async fn purge_gateways(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError>;

    async fn upsert_project_config(&self, row: &ProjectConfigRow) -> Result<(), StoreError>;

    async fn list_project_configs(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<ProjectConfigRow>, StoreError>;

    async fn purge_project_configs(&self, project_id: Uuid, limit: u32)
    -> Result<u64, StoreError>;

    async fn upsert_secret_wiring(&self, row: &SecretWiringRow) -> Result<(), StoreError>;

    async fn list_secret_wiring(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<SecretWiringRow>, StoreError>;

    async fn purge_secret_wiring(&self, project_id: Uuid, limit: u32)
    -> Result<u64, StoreError>;

    // ── Providers & credentials ──────────────────────────────────────

    async fn insert_provider(&self, row: &ProviderRow) -> Result<(), StoreError>;

    async fn purge_providers(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError>;

    async fn insert_project_credential(&self, row: &ProjectCredential) -> Result<(), StoreError>;

    async fn purge_project_credentials(
        &self,
        project_id: Uuid,
        limit: u32,
    ) -> Result<u64, StoreError>;

    // ── Setup drafts ─────────────────────────────────────────────────

    async fn get_setup_draft(
        &self,
        project_id: Uuid,
        host_name: &str,
    ) -> Result<Option<SetupDraft>, StoreError>;

    async fn put_setup_draft(&self, draft: &SetupDraft) -> Result<(), StoreError>;

    async fn purge_setup_drafts(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError>;
}
