//! In-memory store backend for development and tests.
//!
//! All tables live in `BTreeMap`s behind a single `RwLock`, so every trait
//! method observes and commits a consistent snapshot — the same atomicity a
//! transactional database gives the engine. Data is lost on restart.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    AuditLogEntry, CommandResult, CommandResultBlob, DeletionJob, DeletionToken, GatewayRow,
    HostRow, Job, JobStatus, Project, ProjectConfigRow, ProjectCredential, ProjectMember,
    ProjectPolicy, ProjectStatus, ProviderRow, RateLimitRow, RetentionSweep, Run, RunEvent,
    RunStatus, Runner, RunnerCapabilities, RunnerStatus, RunnerToken, SecretWiringRow, SetupDraft,
};
use crate::{Store, StoreError};

#[derive(Debug, Default)]
struct Tables {
    projects: BTreeMap<Uuid, Project>,
    members: BTreeMap<Uuid, ProjectMember>,
    runners: BTreeMap<Uuid, Runner>,
    runner_tokens: BTreeMap<Uuid, RunnerToken>,
    runs: BTreeMap<Uuid, Run>,
    jobs: BTreeMap<Uuid, Job>,
    command_results: BTreeMap<Uuid, CommandResult>,
    command_result_blobs: BTreeMap<Uuid, CommandResultBlob>,
    run_events: BTreeMap<Uuid, RunEvent>,
    audit_logs: BTreeMap<Uuid, AuditLogEntry>,
    // Keyed by project id — one policy per project, walked in key order.
    policies: BTreeMap<Uuid, ProjectPolicy>,
    retention_sweeps: BTreeMap<String, RetentionSweep>,
    deletion_tokens: BTreeMap<Uuid, DeletionToken>,
    deletion_jobs: BTreeMap<Uuid, DeletionJob>,
    rate_limits: BTreeMap<String, RateLimitRow>,
    hosts: BTreeMap<Uuid, HostRow>,
    gateways: BTreeMap<Uuid, GatewayRow>,
    project_configs: BTreeMap<Uuid, ProjectConfigRow>,
    secret_wiring: BTreeMap<Uuid, SecretWiringRow>,
    providers: BTreeMap<Uuid, ProviderRow>,
    project_credentials: BTreeMap<Uuid, ProjectCredential>,
    setup_drafts: BTreeMap<Uuid, SetupDraft>,
}

/// In-memory [`Store`] implementation.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Remove up to `limit` rows matching `pred`, returning how many went.
fn purge_where<T>(
    map: &mut BTreeMap<Uuid, T>,
    limit: u32,
    pred: impl Fn(&T) -> bool,
) -> u64 {
    let ids: Vec<Uuid> = map
        .iter()
        .filter(|(_, v)| pred(v))
        .take(limit as usize)
        .map(|(k, _)| *k)
        .collect();
    let n = ids.len() as u64;
    for id in ids {
        map.remove(&id);
    }
    n
}

/// Clear the terminal-transition fields on a job (payload, sealed
/// ciphertext, reservation deadline, lease triple).
fn clear_job_envelope(job: &mut Job) {
    job.payload_meta = None;
    job.sealed_input_b64 = None;
    job.sealed_pending_expires_at = None;
    job.lease_id = None;
    job.leased_by_runner_id = None;
    job.lease_expires_at = None;
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    // ── Projects ─────────────────────────────────────────────────────

    async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        let taken = t
            .projects
            .values()
            .any(|p| p.owner_id == project.owner_id && p.name == project.name);
        if taken {
            return Err(StoreError::Duplicate(format!(
                "project name '{}' already in use",
                project.name
            )));
        }
        t.projects.insert(project.id, project.clone());
        Ok(())
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, StoreError> {
        Ok(self.tables.read().await.projects.get(&id).cloned())
    }

    async fn set_project_status(
        &self,
        id: Uuid,
        status: ProjectStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        Ok(t.projects.get_mut(&id).is_some_and(|p| {
            p.status = status;
            p.updated_at = updated_at;
            true
        }))
    }

    async fn delete_project(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.projects.remove(&id).is_some())
    }

    // ── Members ──────────────────────────────────────────────────────

    async fn insert_member(&self, member: &ProjectMember) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        let taken = t
            .members
            .values()
            .any(|m| m.project_id == member.project_id && m.user_id == member.user_id);
        if taken {
            return Err(StoreError::Duplicate("member already exists".to_owned()));
        }
        t.members.insert(member.id, member.clone());
        Ok(())
    }

    async fn get_member(
        &self,
        project_id: Uuid,
        user_id: &str,
    ) -> Result<Option<ProjectMember>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.members
            .values()
            .find(|m| m.project_id == project_id && m.user_id == user_id)
            .cloned())
    }

    async fn purge_members(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.members, limit, |m| m.project_id == project_id))
    }

    // ── Runners ──────────────────────────────────────────────────────

    async fn insert_runner(&self, runner: &Runner) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        let taken = t
            .runners
            .values()
            .any(|r| r.project_id == runner.project_id && r.name == runner.name);
        if taken {
            return Err(StoreError::Duplicate(format!(
                "runner name '{}' already in use",
                runner.name
            )));
        }
        t.runners.insert(runner.id, runner.clone());
        Ok(())
    }

    async fn get_runner(&self, id: Uuid) -> Result<Option<Runner>, StoreError> {
        Ok(self.tables.read().await.runners.get(&id).cloned())
    }

    async fn get_runner_by_name(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<Option<Runner>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.runners
            .values()
            .find(|r| r.project_id == project_id && r.name == name)
            .cloned())
    }

    async fn update_runner_heartbeat(
        &self,
        id: Uuid,
        last_seen_at: DateTime<Utc>,
        version: Option<&str>,
        capabilities: &RunnerCapabilities,
    ) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        Ok(t.runners.get_mut(&id).is_some_and(|r| {
            r.last_seen_at = Some(last_seen_at);
            r.last_status = RunnerStatus::Online;
            if let Some(v) = version {
                r.version = Some(v.to_owned());
            }
            r.capabilities = capabilities.clone();
            true
        }))
    }

    async fn set_runner_status(&self, id: Uuid, status: RunnerStatus) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        Ok(t.runners.get_mut(&id).is_some_and(|r| {
            r.last_status = status;
            true
        }))
    }

    async fn purge_runners(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.runners, limit, |r| r.project_id == project_id))
    }

    // ── Runner tokens ────────────────────────────────────────────────

    async fn insert_runner_token(&self, token: &RunnerToken) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.runner_tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn get_runner_token(&self, id: Uuid) -> Result<Option<RunnerToken>, StoreError> {
        Ok(self.tables.read().await.runner_tokens.get(&id).cloned())
    }

    async fn get_runner_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RunnerToken>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.runner_tokens
            .values()
            .find(|tok| tok.token_hash == token_hash)
            .cloned())
    }

    async fn touch_runner_token(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        Ok(t.runner_tokens.get_mut(&id).is_some_and(|tok| {
            tok.last_used_at = Some(now);
            true
        }))
    }

    async fn revoke_runner_token(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        Ok(t.runner_tokens.get_mut(&id).is_some_and(|tok| {
            tok.revoked_at = Some(now);
            true
        }))
    }

    async fn purge_runner_tokens(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.runner_tokens, limit, |tok| {
            tok.project_id == project_id
        }))
    }

    // ── Runs ─────────────────────────────────────────────────────────

    async fn insert_run(&self, run: &Run) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, StoreError> {
        Ok(self.tables.read().await.runs.get(&id).cloned())
    }

    async fn reset_run_to_queued(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        Ok(t.runs.get_mut(&id).is_some_and(|r| {
            r.status = RunStatus::Queued;
            r.finished_at = None;
            r.error_message = None;
            true
        }))
    }

    async fn mark_run_running(
        &self,
        id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        Ok(t.runs.get_mut(&id).is_some_and(|r| {
            r.status = RunStatus::Running;
            r.started_at = Some(started_at);
            true
        }))
    }

    async fn mark_run_terminal(
        &self,
        id: Uuid,
        status: RunStatus,
        finished_at: DateTime<Utc>,
        error_message: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        Ok(t.runs.get_mut(&id).is_some_and(|r| {
            r.status = status;
            r.finished_at = Some(finished_at);
            r.error_message = error_message.map(ToOwned::to_owned);
            true
        }))
    }

    async fn list_terminal_runs_started_before(
        &self,
        project_id: Uuid,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Run>, StoreError> {
        let t = self.tables.read().await;
        let mut runs: Vec<Run> = t
            .runs
            .values()
            .filter(|r| {
                r.project_id == project_id
                    && r.status.is_terminal()
                    && r.started_at.is_some_and(|s| s < cutoff)
            })
            .cloned()
            .collect();
        runs.sort_by_key(|r| (r.started_at, r.id));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn delete_run(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.runs.remove(&id).is_some())
    }

    async fn purge_runs(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.runs, limit, |r| r.project_id == project_id))
    }

    // ── Jobs ─────────────────────────────────────────────────────────

    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.tables.read().await.jobs.get(&id).cloned())
    }

    async fn list_jobs_by_status(
        &self,
        project_id: Uuid,
        status: JobStatus,
        limit: u32,
    ) -> Result<Vec<Job>, StoreError> {
        let t = self.tables.read().await;
        let mut jobs: Vec<Job> = t
            .jobs
            .values()
            .filter(|j| j.project_id == project_id && j.status == status)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.created_at, j.id));
        jobs.truncate(limit as usize);
        Ok(jobs)
    }

    async fn list_queued_jobs(
        &self,
        project_id: Uuid,
        target: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<Job>, StoreError> {
        let t = self.tables.read().await;
        let mut jobs: Vec<Job> = t
            .jobs
            .values()
            .filter(|j| {
                j.project_id == project_id
                    && j.status == JobStatus::Queued
                    && j.target_runner_id == target
            })
            .cloned()
            .collect();
        jobs.sort_by_key(|j| (j.created_at, j.id));
        jobs.truncate(limit as usize);
        Ok(jobs)
    }

    async fn lease_queued_job(
        &self,
        id: Uuid,
        runner_id: Uuid,
        lease_id: &str,
        lease_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        let mut t = self.tables.write().await;
        let Some(job) = t.jobs.get_mut(&id) else {
            return Ok(None);
        };
        if job.status != JobStatus::Queued {
            return Ok(None);
        }
        job.status = JobStatus::Leased;
        job.lease_id = Some(lease_id.to_owned());
        job.leased_by_runner_id = Some(runner_id);
        job.lease_expires_at = Some(lease_expires_at);
        job.attempt = job.attempt.saturating_add(1);
        if job.started_at.is_none() {
            job.started_at = Some(now);
        }
        Ok(Some(job.clone()))
    }

    async fn extend_job_lease(
        &self,
        id: Uuid,
        lease_id: &str,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        let mut t = self.tables.write().await;
        let Some(job) = t.jobs.get_mut(&id) else {
            return Ok(None);
        };
        let held = matches!(job.status, JobStatus::Leased | JobStatus::Running)
            && job.lease_id.as_deref() == Some(lease_id)
            && job.lease_expires_at.is_some();
        if !held {
            return Ok(None);
        }
        job.status = JobStatus::Running;
        job.lease_expires_at = Some(lease_expires_at);
        Ok(Some(job.clone()))
    }

    async fn complete_leased_job(
        &self,
        id: Uuid,
        lease_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        let mut t = self.tables.write().await;
        let Some(job) = t.jobs.get_mut(&id) else {
            return Ok(None);
        };
        let held = matches!(job.status, JobStatus::Leased | JobStatus::Running)
            && job.lease_id.as_deref() == Some(lease_id)
            && job.lease_expires_at.is_some();
        if !held || !status.is_terminal() {
            return Ok(None);
        }
        job.status = status;
        job.error_message = error_message.map(ToOwned::to_owned);
        job.finished_at = Some(finished_at);
        clear_job_envelope(job);
        Ok(Some(job.clone()))
    }

    async fn requeue_leased_job(&self, id: Uuid, lease_id: &str) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        let Some(job) = t.jobs.get_mut(&id) else {
            return Ok(false);
        };
        let held = matches!(job.status, JobStatus::Leased | JobStatus::Running)
            && job.lease_id.as_deref() == Some(lease_id);
        if !held {
            return Ok(false);
        }
        job.status = JobStatus::Queued;
        job.lease_id = None;
        job.leased_by_runner_id = None;
        job.lease_expires_at = None;
        Ok(true)
    }

    async fn fail_job(
        &self,
        id: Uuid,
        error_message: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        let mut t = self.tables.write().await;
        let Some(job) = t.jobs.get_mut(&id) else {
            return Ok(None);
        };
        if job.status.is_terminal() {
            return Ok(None);
        }
        job.status = JobStatus::Failed;
        job.error_message = Some(error_message.to_owned());
        job.finished_at = Some(finished_at);
        clear_job_envelope(job);
        Ok(Some(job.clone()))
    }

    async fn cancel_job(
        &self,
        id: Uuid,
        finished_at: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        let mut t = self.tables.write().await;
        let Some(job) = t.jobs.get_mut(&id) else {
            return Ok(None);
        };
        if job.status.is_terminal() {
            return Ok(None);
        }
        job.status = JobStatus::Canceled;
        job.error_message = None;
        job.finished_at = Some(finished_at);
        clear_job_envelope(job);
        Ok(Some(job.clone()))
    }

    async fn finalize_sealed_job(
        &self,
        id: Uuid,
        sealed_input_b64: &str,
    ) -> Result<Option<Job>, StoreError> {
        let mut t = self.tables.write().await;
        let Some(job) = t.jobs.get_mut(&id) else {
            return Ok(None);
        };
        if job.status != JobStatus::SealedPending {
            return Ok(None);
        }
        job.status = JobStatus::Queued;
        job.sealed_input_b64 = Some(sealed_input_b64.to_owned());
        job.sealed_pending_expires_at = None;
        Ok(Some(job.clone()))
    }

    async fn purge_jobs(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.jobs, limit, |j| j.project_id == project_id))
    }

    // ── Command results ──────────────────────────────────────────────

    async fn insert_command_result(&self, row: &CommandResult) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.command_results.insert(row.id, row.clone());
        Ok(())
    }

    async fn insert_command_result_blob(
        &self,
        row: &CommandResultBlob,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.command_result_blobs.insert(row.id, row.clone());
        Ok(())
    }

    async fn list_command_results(&self, job_id: Uuid) -> Result<Vec<CommandResult>, StoreError> {
        let t = self.tables.read().await;
        let mut rows: Vec<CommandResult> = t
            .command_results
            .values()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.created_at, r.id));
        Ok(rows)
    }

    async fn list_command_result_blobs(
        &self,
        job_id: Uuid,
    ) -> Result<Vec<CommandResultBlob>, StoreError> {
        let t = self.tables.read().await;
        let mut rows: Vec<CommandResultBlob> = t
            .command_result_blobs
            .values()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.created_at, r.id));
        Ok(rows)
    }

    async fn delete_command_result(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.command_results.remove(&id).is_some())
    }

    async fn delete_command_result_blob(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .write()
            .await
            .command_result_blobs
            .remove(&id)
            .is_some())
    }

    async fn mark_blob_consumed(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        Ok(t.command_result_blobs.get_mut(&id).is_some_and(|r| {
            r.consumed_at = Some(now);
            true
        }))
    }

    async fn purge_expired_command_results(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.command_results, limit, |r| {
            r.expires_at <= now
        }))
    }

    async fn purge_expired_command_result_blobs(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<String>, StoreError> {
        let mut t = self.tables.write().await;
        let ids: Vec<(Uuid, String)> = t
            .command_result_blobs
            .iter()
            .filter(|(_, r)| r.expires_at <= now)
            .take(limit as usize)
            .map(|(k, r)| (*k, r.storage_id.clone()))
            .collect();
        let mut storage_ids = Vec::with_capacity(ids.len());
        for (id, storage_id) in ids {
            t.command_result_blobs.remove(&id);
            storage_ids.push(storage_id);
        }
        Ok(storage_ids)
    }

    async fn purge_command_results(
        &self,
        project_id: Uuid,
        limit: u32,
    ) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.command_results, limit, |r| {
            r.project_id == project_id
        }))
    }

    async fn purge_command_result_blobs(
        &self,
        project_id: Uuid,
        limit: u32,
    ) -> Result<Vec<String>, StoreError> {
        let mut t = self.tables.write().await;
        let ids: Vec<(Uuid, String)> = t
            .command_result_blobs
            .iter()
            .filter(|(_, r)| r.project_id == project_id)
            .take(limit as usize)
            .map(|(k, r)| (*k, r.storage_id.clone()))
            .collect();
        let mut storage_ids = Vec::with_capacity(ids.len());
        for (id, storage_id) in ids {
            t.command_result_blobs.remove(&id);
            storage_ids.push(storage_id);
        }
        Ok(storage_ids)
    }

    // ── Run events ───────────────────────────────────────────────────

    async fn insert_run_events(&self, events: &[RunEvent]) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        for event in events {
            t.run_events.insert(event.id, event.clone());
        }
        Ok(())
    }

    async fn list_run_events(
        &self,
        run_id: Uuid,
        limit: u32,
    ) -> Result<Vec<RunEvent>, StoreError> {
        let t = self.tables.read().await;
        let mut rows: Vec<RunEvent> = t
            .run_events
            .values()
            .filter(|e| e.run_id == run_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| (e.ts, e.id));
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn delete_run_events_before(
        &self,
        project_id: Uuid,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.run_events, limit, |e| {
            e.project_id == project_id && e.ts < cutoff
        }))
    }

    async fn delete_run_events_for_run(
        &self,
        run_id: Uuid,
        limit: u32,
    ) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.run_events, limit, |e| e.run_id == run_id))
    }

    async fn purge_run_events(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.run_events, limit, |e| {
            e.project_id == project_id
        }))
    }

    // ── Audit log ────────────────────────────────────────────────────

    async fn insert_audit(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.audit_logs.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn list_audit(
        &self,
        project_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<AuditLogEntry>, StoreError> {
        let t = self.tables.read().await;
        let mut rows: Vec<AuditLogEntry> = t
            .audit_logs
            .values()
            .filter(|e| e.project_id == Some(project_id))
            .cloned()
            .collect();
        rows.sort_by_key(|e| (std::cmp::Reverse(e.ts), e.id));
        Ok(rows
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn delete_audit_before(
        &self,
        project_id: Uuid,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.audit_logs, limit, |e| {
            e.project_id == Some(project_id) && e.ts < cutoff
        }))
    }

    async fn purge_audit_logs(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.audit_logs, limit, |e| {
            e.project_id == Some(project_id)
        }))
    }

    // ── Retention policies & sweep cursor ────────────────────────────

    async fn upsert_policy(&self, policy: &ProjectPolicy) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        let mut row = policy.clone();
        if let Some(existing) = t.policies.get(&policy.project_id) {
            row.id = existing.id;
        }
        t.policies.insert(policy.project_id, row);
        Ok(())
    }

    async fn get_policy(&self, project_id: Uuid) -> Result<Option<ProjectPolicy>, StoreError> {
        Ok(self.tables.read().await.policies.get(&project_id).cloned())
    }

    async fn list_policies_after(
        &self,
        cursor: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<ProjectPolicy>, StoreError> {
        let t = self.tables.read().await;
        let rows = t
            .policies
            .iter()
            .filter(|(project_id, _)| cursor.is_none_or(|c| **project_id > c))
            .take(limit as usize)
            .map(|(_, p)| p.clone())
            .collect();
        Ok(rows)
    }

    async fn purge_policies(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        if limit == 0 {
            return Ok(0);
        }
        Ok(u64::from(t.policies.remove(&project_id).is_some()))
    }

    async fn get_retention_sweep(&self, key: &str) -> Result<Option<RetentionSweep>, StoreError> {
        Ok(self.tables.read().await.retention_sweeps.get(key).cloned())
    }

    async fn put_retention_sweep(&self, sweep: &RetentionSweep) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.retention_sweeps.insert(sweep.key.clone(), sweep.clone());
        Ok(())
    }

    // ── Erasure ──────────────────────────────────────────────────────

    async fn insert_deletion_token(&self, token: &DeletionToken) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.deletion_tokens.insert(token.id, token.clone());
        Ok(())
    }

    async fn list_deletion_tokens(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<DeletionToken>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.deletion_tokens
            .values()
            .filter(|tok| tok.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn delete_deletion_tokens(&self, project_id: Uuid) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.deletion_tokens, u32::MAX, |tok| {
            tok.project_id == project_id
        }))
    }

    async fn purge_deletion_tokens(
        &self,
        project_id: Uuid,
        limit: u32,
    ) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.deletion_tokens, limit, |tok| {
            tok.project_id == project_id
        }))
    }

    async fn insert_deletion_job(&self, job: &DeletionJob) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.deletion_jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_deletion_job(&self, id: Uuid) -> Result<Option<DeletionJob>, StoreError> {
        Ok(self.tables.read().await.deletion_jobs.get(&id).cloned())
    }

    async fn get_active_deletion_job(
        &self,
        project_id: Uuid,
    ) -> Result<Option<DeletionJob>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.deletion_jobs
            .values()
            .find(|j| j.project_id == project_id && !j.status.is_terminal())
            .cloned())
    }

    async fn get_latest_deletion_job(
        &self,
        project_id: Uuid,
    ) -> Result<Option<DeletionJob>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.deletion_jobs
            .values()
            .filter(|j| j.project_id == project_id)
            .max_by_key(|j| (j.created_at, j.id))
            .cloned())
    }

    async fn update_deletion_job(&self, job: &DeletionJob) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        if !t.deletion_jobs.contains_key(&job.id) {
            return Ok(false);
        }
        t.deletion_jobs.insert(job.id, job.clone());
        Ok(true)
    }

    // ── Rate limiting ────────────────────────────────────────────────

    async fn get_rate_limit(&self, key: &str) -> Result<Option<RateLimitRow>, StoreError> {
        Ok(self.tables.read().await.rate_limits.get(key).cloned())
    }

    async fn put_rate_limit(&self, row: &RateLimitRow) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.rate_limits.insert(row.key.clone(), row.clone());
        Ok(())
    }

    // ── Runner-reported metadata ─────────────────────────────────────

    async fn upsert_host(&self, row: &HostRow) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        let mut new_row = row.clone();
        if let Some(existing) = t
            .hosts
            .values()
            .find(|h| h.project_id == row.project_id && h.host_name == row.host_name)
        {
            new_row.id = existing.id;
        }
        t.hosts.insert(new_row.id, new_row);
        Ok(())
    }

    async fn list_hosts(&self, project_id: Uuid) -> Result<Vec<HostRow>, StoreError> {
        let t = self.tables.read().await;
        let mut rows: Vec<HostRow> = t
            .hosts
            .values()
            .filter(|h| h.project_id == project_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.host_name.cmp(&b.host_name));
        Ok(rows)
    }

    async fn purge_hosts(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.hosts, limit, |h| h.project_id == project_id))
    }

    async fn upsert_gateway(&self, row: &GatewayRow) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        let mut new_row = row.clone();
        if let Some(existing) = t.gateways.values().find(|g| {
            g.project_id == row.project_id
                && g.host_name == row.host_name
                && g.gateway_id == row.gateway_id
        }) {
            new_row.id = existing.id;
        }
        t.gateways.insert(new_row.id, new_row);
        Ok(())
    }

    async fn list_gateways(&self, project_id: Uuid) -> Result<Vec<GatewayRow>, StoreError> {
        let t = self.tables.read().await;
        let mut rows: Vec<GatewayRow> = t
            .gateways
            .values()
            .filter(|g| g.project_id == project_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (&a.host_name, &a.gateway_id).cmp(&(&b.host_name, &b.gateway_id)));
        Ok(rows)
    }

    async fn purge_gateways(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.gateways, limit, |g| {
            g.project_id == project_id
        }))
    }

    async fn upsert_project_config(&self, row: &ProjectConfigRow) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        let mut new_row = row.clone();
        if let Some(existing) = t
            .project_configs
            .values()
            .find(|c| c.project_id == row.project_id && c.name == row.name)
        {
            new_row.id = existing.id;
        }
        t.project_configs.insert(new_row.id, new_row);
        Ok(())
    }

    async fn list_project_configs(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<ProjectConfigRow>, StoreError> {
        let t = self.tables.read().await;
        let mut rows: Vec<ProjectConfigRow> = t
            .project_configs
            .values()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn purge_project_configs(
        &self,
        project_id: Uuid,
        limit: u32,
    ) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.project_configs, limit, |c| {
            c.project_id == project_id
        }))
    }

    async fn upsert_secret_wiring(&self, row: &SecretWiringRow) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        let mut new_row = row.clone();
        if let Some(existing) = t.secret_wiring.values().find(|w| {
            w.project_id == row.project_id
                && w.host_name == row.host_name
                && w.secret_name == row.secret_name
        }) {
            new_row.id = existing.id;
        }
        t.secret_wiring.insert(new_row.id, new_row);
        Ok(())
    }

    async fn list_secret_wiring(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<SecretWiringRow>, StoreError> {
        let t = self.tables.read().await;
        let mut rows: Vec<SecretWiringRow> = t
            .secret_wiring
            .values()
            .filter(|w| w.project_id == project_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (&a.host_name, &a.secret_name).cmp(&(&b.host_name, &b.secret_name)));
        Ok(rows)
    }

    async fn purge_secret_wiring(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.secret_wiring, limit, |w| {
            w.project_id == project_id
        }))
    }

    // ── Providers & credentials ──────────────────────────────────────

    async fn insert_provider(&self, row: &ProviderRow) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.providers.insert(row.id, row.clone());
        Ok(())
    }

    async fn purge_providers(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.providers, limit, |p| {
            p.project_id == project_id
        }))
    }

    async fn insert_project_credential(&self, row: &ProjectCredential) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.project_credentials.insert(row.id, row.clone());
        Ok(())
    }

    async fn purge_project_credentials(
        &self,
        project_id: Uuid,
        limit: u32,
    ) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.project_credentials, limit, |c| {
            c.project_id == project_id
        }))
    }

    // ── Setup drafts ─────────────────────────────────────────────────

    async fn get_setup_draft(
        &self,
        project_id: Uuid,
        host_name: &str,
    ) -> Result<Option<SetupDraft>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.setup_drafts
            .values()
            .find(|d| d.project_id == project_id && d.host_name == host_name)
            .cloned())
    }

    async fn put_setup_draft(&self, draft: &SetupDraft) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        let mut new_row = draft.clone();
        if let Some(existing) = t
            .setup_drafts
            .values()
            .find(|d| d.project_id == draft.project_id && d.host_name == draft.host_name)
        {
            new_row.id = existing.id;
        }
        t.setup_drafts.insert(new_row.id, new_row);
        Ok(())
    }

    async fn purge_setup_drafts(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        let mut t = self.tables.write().await;
        Ok(purge_where(&mut t.setup_drafts, limit, |d| {
            d.project_id == project_id
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkspaceRef;

    fn project(owner: &str, name: &str) -> Project {
        let now = Utc::now();
        Project {
            id: Uuid::new_v4(),
            owner_id: owner.to_owned(),
            name: name.to_owned(),
            execution_mode: crate::models::ExecutionMode::RemoteRunner,
            workspace: WorkspaceRef::Git {
                remote: "git@example.com:fleet/app.git".to_owned(),
                subpath: None,
            },
            local_path: None,
            runner_repo_path: Some("deploy".to_owned()),
            status: ProjectStatus::Creating,
            created_at: now,
            updated_at: now,
        }
    }

    fn queued_job(project_id: Uuid, run_id: Uuid, created_at: DateTime<Utc>) -> Job {
        Job {
            id: Uuid::new_v4(),
            project_id,
            run_id,
            kind: "custom".to_owned(),
            payload_meta: None,
            payload_hash: None,
            target_runner_id: None,
            sealed_input_required: false,
            sealed_input_b64: None,
            sealed_input_alg: None,
            sealed_input_key_id: None,
            sealed_pending_expires_at: None,
            lease_id: None,
            leased_by_runner_id: None,
            lease_expires_at: None,
            attempt: 0,
            status: JobStatus::Queued,
            error_message: None,
            created_at,
            started_at: None,
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn duplicate_project_name_rejected() {
        let store = MemoryStore::new();
        store.insert_project(&project("alice", "fleet")).await.unwrap();
        let err = store.insert_project(&project("alice", "fleet")).await;
        assert!(matches!(err, Err(StoreError::Duplicate(_))));
        // Same name under another owner is fine.
        store.insert_project(&project("bob", "fleet")).await.unwrap();
    }

    #[tokio::test]
    async fn lease_claim_is_conditional_on_queued() {
        let store = MemoryStore::new();
        let job = queued_job(Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        store.insert_job(&job).await.unwrap();

        let runner = Uuid::new_v4();
        let until = Utc::now() + chrono::Duration::seconds(30);
        let leased = store
            .lease_queued_job(job.id, runner, "lease-1", until, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leased.status, JobStatus::Leased);
        assert_eq!(leased.attempt, 1);

        // Second claim loses — the job is no longer queued.
        let second = store
            .lease_queued_job(job.id, runner, "lease-2", until, Utc::now())
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn queued_listing_is_oldest_first_and_split_by_target() {
        let store = MemoryStore::new();
        let project_id = Uuid::new_v4();
        let run_id = Uuid::new_v4();
        let runner = Uuid::new_v4();
        let base = Utc::now();

        let mut older = queued_job(project_id, run_id, base);
        older.target_runner_id = Some(runner);
        let newer = queued_job(project_id, run_id, base + chrono::Duration::seconds(1));
        store.insert_job(&newer).await.unwrap();
        store.insert_job(&older).await.unwrap();

        let targeted = store
            .list_queued_jobs(project_id, Some(runner), 100)
            .await
            .unwrap();
        assert_eq!(targeted.len(), 1);
        assert_eq!(targeted[0].id, older.id);

        let untargeted = store.list_queued_jobs(project_id, None, 100).await.unwrap();
        assert_eq!(untargeted.len(), 1);
        assert_eq!(untargeted[0].id, newer.id);
    }

    #[tokio::test]
    async fn complete_requires_matching_lease() {
        let store = MemoryStore::new();
        let job = queued_job(Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        store.insert_job(&job).await.unwrap();
        let until = Utc::now() + chrono::Duration::seconds(30);
        store
            .lease_queued_job(job.id, Uuid::new_v4(), "lease-1", until, Utc::now())
            .await
            .unwrap()
            .unwrap();

        let wrong = store
            .complete_leased_job(job.id, "lease-9", JobStatus::Succeeded, None, Utc::now())
            .await
            .unwrap();
        assert!(wrong.is_none());

        let done = store
            .complete_leased_job(job.id, "lease-1", JobStatus::Succeeded, None, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, JobStatus::Succeeded);
        assert!(done.lease_id.is_none());
    }

    #[tokio::test]
    async fn purge_respects_limit() {
        let store = MemoryStore::new();
        let project_id = Uuid::new_v4();
        let run_id = Uuid::new_v4();
        for _ in 0..5 {
            store
                .insert_job(&queued_job(project_id, run_id, Utc::now()))
                .await
                .unwrap();
        }
        assert_eq!(store.purge_jobs(project_id, 3).await.unwrap(), 3);
        assert_eq!(store.purge_jobs(project_id, 10).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn policies_walk_in_project_id_order() {
        let store = MemoryStore::new();
        let mut ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        ids.sort();
        for project_id in &ids {
            store
                .upsert_policy(&ProjectPolicy {
                    id: Uuid::new_v4(),
                    project_id: *project_id,
                    retention_days: 30,
                    updated_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let first = store.list_policies_after(None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].project_id, ids[0]);
        let rest = store
            .list_policies_after(Some(first[1].project_id), 2)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].project_id, ids[2]);
    }
}
