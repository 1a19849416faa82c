//! The lease engine: job lifecycle from enqueue to terminal state.
//!
//! Jobs move `queued → leased → running → {succeeded, failed, canceled}`,
//! with `sealed_pending` in front of `queued` for secret-bearing payloads.
//! Every claim writes its lease in the same store transition that reads
//! `status = queued`, which is what makes at-most-one-executor hold; lease
//! expiry is non-destructive (requeue) and `lease_next` is the authority
//! that reclaims stale leases.

use chrono::Duration;
use clawlets_store::models::{Job, JobStatus, Run, RunStatus, RunnerStatus};
use uuid::Uuid;

use crate::SEALED_INPUT_ALG;
use crate::audit::{AuditEvent, JobTarget, JobsEnqueueData, SealedReserveData};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::redact::redact_message;
use crate::results::CompletionSlot;
use crate::runner_auth::RunnerIdentity;
use crate::validate::{
    assert_no_secret_like_keys, ensure_bounded_string_opt, validate_job_kind,
    validate_payload_for_kind, validate_sealed_envelope,
};

/// A job is failed outright once it has been attempted this many times.
pub const ATTEMPT_CAP: i64 = 25;

/// Lease TTL bounds and default, in milliseconds.
pub const LEASE_TTL_MIN_MS: i64 = 5_000;
pub const LEASE_TTL_MAX_MS: i64 = 120_000;
pub const LEASE_TTL_DEFAULT_MS: i64 = 30_000;

/// A sealed reservation must be finalized within this window.
const SEALED_PENDING_TTL: Duration = Duration::minutes(5);

/// Stale sealed/lease sweeps look at this many rows per class per call.
const SWEEP_BATCH: u32 = 50;

/// Candidate window per class (targeted / untargeted) in `lease_next`.
const CANDIDATE_WINDOW: u32 = 100;

const EXPIRED_RESERVATION_ERROR: &str = "sealed-input reservation expired before finalize";

/// Arguments shared by enqueue and sealed reservation.
#[derive(Debug, Clone, Default)]
pub struct EnqueueArgs {
    pub kind: String,
    pub payload_meta: Option<serde_json::Value>,
    /// Reuse an existing run instead of inserting a fresh one.
    pub run_id: Option<Uuid>,
    pub title: Option<String>,
    pub host: Option<String>,
    pub target_runner_id: Option<Uuid>,
}

/// A sealed-input reservation: the operator seals the payload client-side
/// against this capability triple, then finalizes.
#[derive(Debug, Clone)]
pub struct SealedReservation {
    pub job_id: Uuid,
    pub run_id: Uuid,
    pub sealed_input_alg: String,
    pub sealed_input_key_id: String,
    pub sealed_input_public_key_spki: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// Outcome of a runner-side heartbeat/complete call. `ok = false` reports
/// the observed status without mutation — the runner drops its work and
/// re-leases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub ok: bool,
    pub status: String,
}

impl JobOutcome {
    fn rejected(status: Option<JobStatus>) -> Self {
        Self {
            ok: false,
            status: status.map_or_else(|| "failed".to_owned(), |s| s.to_string()),
        }
    }
}

fn clamp_lease_ttl(lease_ttl_ms: Option<i64>) -> Duration {
    let ms = lease_ttl_ms
        .unwrap_or(LEASE_TTL_DEFAULT_MS)
        .clamp(LEASE_TTL_MIN_MS, LEASE_TTL_MAX_MS);
    Duration::milliseconds(ms)
}

impl Engine {
    // ── Operator side ────────────────────────────────────────────────

    /// Enqueue a non-sealed job (admin only, rate-limited 60/min).
    pub async fn enqueue(
        &self,
        principal: Option<&str>,
        project_id: Uuid,
        args: EnqueueArgs,
    ) -> Result<Job, EngineError> {
        let access = self.require_project_admin(principal, project_id).await?;
        self.check_rate_limit(
            &format!("jobs.enqueue:{}", access.principal),
            60,
            Duration::minutes(1),
        )
        .await?;

        let kind = validate_job_kind(&args.kind)?;
        self.validate_payload(&kind, args.payload_meta.as_ref())?;

        if let Some(runner_id) = args.target_runner_id {
            self.require_online_runner(project_id, runner_id).await?;
        }

        let run = self
            .resolve_run(project_id, &access.principal, &kind, &args)
            .await?;
        let job = self
            .insert_job_row(project_id, &run, &kind, &args, JobStatus::Queued, None)
            .await?;

        self.append_audit(
            &access.principal,
            Some(project_id),
            AuditEvent::JobsEnqueue {
                target: JobTarget { job_id: job.id },
                data: JobsEnqueueData {
                    kind,
                    run_id: run.id,
                },
            },
        )
        .await?;
        Ok(job)
    }

    /// Reserve a sealed-input job slot against a capable target runner.
    ///
    /// The job sits in `sealed_pending` until the operator finalizes with
    /// the ciphertext; an unfinalized reservation expires destructively
    /// after five minutes.
    pub async fn reserve_sealed_input(
        &self,
        principal: Option<&str>,
        project_id: Uuid,
        args: EnqueueArgs,
    ) -> Result<SealedReservation, EngineError> {
        let access = self.require_project_admin(principal, project_id).await?;
        self.check_rate_limit(
            &format!("jobs.enqueue:{}", access.principal),
            60,
            Duration::minutes(1),
        )
        .await?;

        let kind = validate_job_kind(&args.kind)?;
        self.validate_payload(&kind, args.payload_meta.as_ref())?;

        let Some(target_runner_id) = args.target_runner_id else {
            return Err(EngineError::Conflict(
                "sealed input requires a target runner".to_owned(),
            ));
        };
        let runner = self.require_online_runner(project_id, target_runner_id).await?;
        let caps = &runner.capabilities;
        let (Some(alg), Some(key_id), Some(spki)) = (
            caps.sealed_input_alg.as_deref(),
            caps.sealed_input_key_id.as_deref(),
            caps.sealed_input_public_key_spki.as_deref(),
        ) else {
            return Err(EngineError::Conflict(
                "target runner has no sealed-input capability".to_owned(),
            ));
        };
        if !caps.supports_sealed_input || alg != SEALED_INPUT_ALG {
            return Err(EngineError::Conflict(
                "target runner has no sealed-input capability".to_owned(),
            ));
        }

        let run = self
            .resolve_run(project_id, &access.principal, &kind, &args)
            .await?;
        let expires_at = self.now() + SEALED_PENDING_TTL;
        let job = self
            .insert_job_row(
                project_id,
                &run,
                &kind,
                &args,
                JobStatus::SealedPending,
                Some((alg, key_id, expires_at)),
            )
            .await?;

        self.append_audit(
            &access.principal,
            Some(project_id),
            AuditEvent::JobsSealedReserve {
                target: JobTarget { job_id: job.id },
                data: SealedReserveData {
                    kind,
                    target_runner_id,
                },
            },
        )
        .await?;

        Ok(SealedReservation {
            job_id: job.id,
            run_id: run.id,
            sealed_input_alg: alg.to_owned(),
            sealed_input_key_id: key_id.to_owned(),
            sealed_input_public_key_spki: spki.to_owned(),
            expires_at,
        })
    }

    /// Finalize a sealed reservation with the client-sealed ciphertext.
    #[allow(clippy::too_many_arguments)]
    pub async fn finalize_sealed_enqueue(
        &self,
        principal: Option<&str>,
        project_id: Uuid,
        job_id: Uuid,
        kind: &str,
        sealed_input_b64: &str,
        alg: &str,
        key_id: &str,
    ) -> Result<Job, EngineError> {
        let access = self.require_project_admin(principal, project_id).await?;
        self.check_rate_limit(
            &format!("jobs.finalize:{}", access.principal),
            60,
            Duration::minutes(1),
        )
        .await?;

        let job = self
            .store
            .get_job(job_id)
            .await?
            .filter(|j| j.project_id == project_id)
            .ok_or_else(|| EngineError::NotFound("job not found".to_owned()))?;
        if job.status != JobStatus::SealedPending {
            return Err(EngineError::Conflict(
                "job is not awaiting sealed input".to_owned(),
            ));
        }
        if job.sealed_pending_expires_at.is_none_or(|exp| exp <= self.now()) {
            return Err(EngineError::Conflict("reservation expired".to_owned()));
        }
        if job.kind != kind {
            return Err(EngineError::Conflict(format!(
                "kind '{kind}' does not match the reservation"
            )));
        }
        if alg != SEALED_INPUT_ALG {
            return Err(EngineError::Conflict(format!(
                "unsupported sealed-input algorithm '{alg}'"
            )));
        }
        if job.sealed_input_alg.as_deref().is_some_and(|a| a != alg) {
            return Err(EngineError::Conflict(
                "sealed-input algorithm does not match the reservation".to_owned(),
            ));
        }
        if job.sealed_input_key_id.as_deref().is_some_and(|k| k != key_id) {
            return Err(EngineError::Conflict(
                "sealed-input key changed, retry reserve/finalize".to_owned(),
            ));
        }
        validate_sealed_envelope(sealed_input_b64)?;

        let finalized = self
            .store
            .finalize_sealed_job(job_id, sealed_input_b64)
            .await?
            .ok_or_else(|| EngineError::Conflict("reservation is no longer pending".to_owned()))?;
        self.store.reset_run_to_queued(finalized.run_id).await?;

        self.append_audit(
            &access.principal,
            Some(project_id),
            AuditEvent::JobsSealedFinalize {
                target: JobTarget { job_id },
            },
        )
        .await?;
        Ok(finalized)
    }

    /// Cancel a non-terminal job (admin only). Terminal jobs conflict.
    pub async fn cancel_job(
        &self,
        principal: Option<&str>,
        project_id: Uuid,
        job_id: Uuid,
    ) -> Result<Job, EngineError> {
        let access = self.require_project_admin(principal, project_id).await?;
        self.check_rate_limit(
            &format!("jobs.cancel:{}", access.principal),
            60,
            Duration::minutes(1),
        )
        .await?;

        let job = self
            .store
            .get_job(job_id)
            .await?
            .filter(|j| j.project_id == project_id)
            .ok_or_else(|| EngineError::NotFound("job not found".to_owned()))?;
        if job.status.is_terminal() {
            return Err(EngineError::Conflict("job is already terminal".to_owned()));
        }

        let canceled = self
            .store
            .cancel_job(job_id, self.now())
            .await?
            .ok_or_else(|| EngineError::Conflict("job is already terminal".to_owned()))?;
        self.project_job_terminal(&canceled).await?;

        self.append_audit(
            &access.principal,
            Some(project_id),
            AuditEvent::JobsCancel {
                target: JobTarget { job_id },
            },
        )
        .await?;
        Ok(canceled)
    }

    // ── Runner side ──────────────────────────────────────────────────

    /// Lease the oldest eligible queued job for a runner.
    ///
    /// Sweeps stale sealed reservations and expired leases first, then
    /// merges the targeted and untargeted candidate windows oldest-first
    /// (targeted wins ties). Returns `None` when nothing is leasable.
    pub async fn lease_next(
        &self,
        identity: &RunnerIdentity,
        lease_ttl_ms: Option<i64>,
    ) -> Result<Option<Job>, EngineError> {
        let project_id = identity.runner.project_id;
        let runner_id = identity.runner.id;
        let ttl = clamp_lease_ttl(lease_ttl_ms);

        self.sweep_expired_sealed_pendings(project_id).await?;
        self.sweep_expired_leases(project_id).await?;

        let targeted = self
            .store
            .list_queued_jobs(project_id, Some(runner_id), CANDIDATE_WINDOW)
            .await?;
        let untargeted = self
            .store
            .list_queued_jobs(project_id, None, CANDIDATE_WINDOW)
            .await?;

        for candidate in merge_by_created_at(targeted, untargeted) {
            // Defense in depth: never hand out a job targeted elsewhere.
            if candidate
                .target_runner_id
                .is_some_and(|target| target != runner_id)
            {
                continue;
            }
            // A queued sealed job without ciphertext is an expired
            // reservation that slipped past the sweep.
            if candidate.sealed_input_required && candidate.sealed_input_b64.is_none() {
                self.fail_and_project(candidate.id, EXPIRED_RESERVATION_ERROR).await?;
                continue;
            }
            if candidate.attempt >= ATTEMPT_CAP {
                let message =
                    format!("attempt cap exceeded ({}/{ATTEMPT_CAP})", candidate.attempt);
                self.fail_and_project(candidate.id, &message).await?;
                continue;
            }

            let now = self.now();
            let lease_id = Uuid::new_v4().to_string();
            let leased = self
                .store
                .lease_queued_job(candidate.id, runner_id, &lease_id, now + ttl, now)
                .await?;
            let Some(leased) = leased else {
                // Lost the claim to a concurrent lease; try the next one.
                continue;
            };
            self.store.mark_run_running(leased.run_id, now).await?;
            tracing::debug!(job_id = %leased.id, runner_id = %runner_id, attempt = leased.attempt, "job leased");
            return Ok(Some(leased));
        }
        Ok(None)
    }

    /// Extend a held lease and mark the job running.
    ///
    /// A lease whose expiry just passed is still honored while its id has
    /// not rotated — `lease_next` is what rotates it.
    pub async fn job_heartbeat(
        &self,
        job_id: Uuid,
        lease_id: &str,
        lease_ttl_ms: Option<i64>,
    ) -> Result<JobOutcome, EngineError> {
        let ttl = clamp_lease_ttl(lease_ttl_ms);
        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(JobOutcome::rejected(None));
        };
        if !can_complete(&job, lease_id) {
            return Ok(JobOutcome::rejected(Some(job.status)));
        }

        let extended = self
            .store
            .extend_job_lease(job_id, lease_id, self.now() + ttl)
            .await?;
        match extended {
            Some(job) => Ok(JobOutcome {
                ok: true,
                status: job.status.to_string(),
            }),
            None => {
                let status = self.store.get_job(job_id).await?.map(|j| j.status);
                Ok(JobOutcome::rejected(status))
            }
        }
    }

    /// Complete a held job with a terminal status and an optional result.
    pub async fn complete_job(
        &self,
        job_id: Uuid,
        lease_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
        result: Option<CompletionSlot>,
    ) -> Result<JobOutcome, EngineError> {
        if !status.is_terminal() {
            return Err(EngineError::Conflict(format!(
                "'{status}' is not a terminal status"
            )));
        }
        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(JobOutcome::rejected(None));
        };
        if !can_complete(&job, lease_id) {
            return Ok(JobOutcome::rejected(Some(job.status)));
        }

        let sanitized = match (status, error_message) {
            (JobStatus::Failed, Some(message)) => Some(redact_message(message.trim())),
            _ => None,
        };
        let completed = self
            .store
            .complete_leased_job(
                job_id,
                lease_id,
                status,
                sanitized.as_deref(),
                self.now(),
            )
            .await?;
        let Some(completed) = completed else {
            let status = self.store.get_job(job_id).await?.map(|j| j.status);
            return Ok(JobOutcome::rejected(status));
        };

        // Results are ancillary: failures are logged, never surfaced — the
        // job and run transitions stay the source of truth.
        if completed.status == JobStatus::Succeeded {
            if let Some(result) = result {
                if let Err(e) = self.store_completion_result(&completed, result).await {
                    tracing::warn!(job_id = %completed.id, error = %e, "result storage failed");
                }
            }
        }

        self.project_job_terminal(&completed).await?;
        Ok(JobOutcome {
            ok: true,
            status: completed.status.to_string(),
        })
    }

    // ── Sweeps & helpers ─────────────────────────────────────────────

    /// Fail sealed reservations whose finalize deadline has passed.
    async fn sweep_expired_sealed_pendings(&self, project_id: Uuid) -> Result<(), EngineError> {
        let now = self.now();
        let pendings = self
            .store
            .list_jobs_by_status(project_id, JobStatus::SealedPending, SWEEP_BATCH)
            .await?;
        for job in pendings {
            if job.sealed_pending_expires_at.is_none_or(|exp| exp <= now) {
                self.fail_and_project(job.id, EXPIRED_RESERVATION_ERROR).await?;
            }
        }
        Ok(())
    }

    /// Requeue leased/running jobs whose lease has expired. The requeue
    /// rotates nothing but the status — attempt is unchanged — and the
    /// owning run drops back to `queued`.
    async fn sweep_expired_leases(&self, project_id: Uuid) -> Result<(), EngineError> {
        let now = self.now();
        for status in [JobStatus::Leased, JobStatus::Running] {
            let jobs = self
                .store
                .list_jobs_by_status(project_id, status, SWEEP_BATCH)
                .await?;
            for job in jobs {
                let expired = job.lease_expires_at.is_some_and(|exp| exp <= now);
                let Some(lease_id) = job.lease_id.as_deref() else {
                    continue;
                };
                if expired && self.store.requeue_leased_job(job.id, lease_id).await? {
                    self.store.reset_run_to_queued(job.run_id).await?;
                    tracing::debug!(job_id = %job.id, "stale lease reclaimed");
                }
            }
        }
        Ok(())
    }

    async fn fail_and_project(&self, job_id: Uuid, message: &str) -> Result<(), EngineError> {
        if let Some(failed) = self.store.fail_job(job_id, message, self.now()).await? {
            self.project_job_terminal(&failed).await?;
        }
        Ok(())
    }

    fn validate_payload(
        &self,
        kind: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<(), EngineError> {
        if let Some(payload) = payload {
            assert_no_secret_like_keys(payload)?;
        }
        validate_payload_for_kind(kind, payload)
    }

    async fn require_online_runner(
        &self,
        project_id: Uuid,
        runner_id: Uuid,
    ) -> Result<clawlets_store::models::Runner, EngineError> {
        let runner = self
            .store
            .get_runner(runner_id)
            .await?
            .filter(|r| r.project_id == project_id)
            .ok_or_else(|| EngineError::NotFound("target runner not found".to_owned()))?;
        if runner.last_status != RunnerStatus::Online {
            return Err(EngineError::Conflict(format!(
                "target runner '{}' is offline",
                runner.name
            )));
        }
        Ok(runner)
    }

    /// Fetch-and-reset an existing run, or insert a fresh queued one.
    async fn resolve_run(
        &self,
        project_id: Uuid,
        principal: &str,
        kind: &str,
        args: &EnqueueArgs,
    ) -> Result<Run, EngineError> {
        let title = ensure_bounded_string_opt(args.title.as_deref(), "title", 200)?;
        let host = ensure_bounded_string_opt(args.host.as_deref(), "host", 253)?;

        if let Some(run_id) = args.run_id {
            let run = self
                .store
                .get_run(run_id)
                .await?
                .filter(|r| r.project_id == project_id)
                .ok_or_else(|| EngineError::NotFound("run not found".to_owned()))?;
            self.store.reset_run_to_queued(run.id).await?;
            return Ok(Run {
                status: RunStatus::Queued,
                finished_at: None,
                error_message: None,
                ..run
            });
        }

        let now = self.now();
        let run = Run {
            id: Uuid::new_v4(),
            project_id,
            kind: kind.to_owned(),
            status: RunStatus::Queued,
            title,
            host,
            initiator: Some(principal.to_owned()),
            started_at: Some(now),
            finished_at: None,
            error_message: None,
            created_at: now,
        };
        self.store.insert_run(&run).await?;
        Ok(run)
    }

    async fn insert_job_row(
        &self,
        project_id: Uuid,
        run: &Run,
        kind: &str,
        args: &EnqueueArgs,
        status: JobStatus,
        sealed: Option<(&str, &str, chrono::DateTime<chrono::Utc>)>,
    ) -> Result<Job, EngineError> {
        let payload_hash = args
            .payload_meta
            .as_ref()
            .map(|meta| {
                serde_json::to_string(meta)
                    .map(|canonical| crate::util::sha256_hex(canonical.as_bytes()))
                    .map_err(|e| EngineError::Conflict(format!("unencodable payload: {e}")))
            })
            .transpose()?;

        let job = Job {
            id: Uuid::new_v4(),
            project_id,
            run_id: run.id,
            kind: kind.to_owned(),
            payload_meta: args.payload_meta.clone(),
            payload_hash,
            target_runner_id: args.target_runner_id,
            sealed_input_required: sealed.is_some(),
            sealed_input_b64: None,
            sealed_input_alg: sealed.map(|(alg, _, _)| alg.to_owned()),
            sealed_input_key_id: sealed.map(|(_, key_id, _)| key_id.to_owned()),
            sealed_pending_expires_at: sealed.map(|(_, _, expires)| expires),
            lease_id: None,
            leased_by_runner_id: None,
            lease_expires_at: None,
            attempt: 0,
            status,
            error_message: None,
            created_at: self.now(),
            started_at: None,
            finished_at: None,
        };
        self.store.insert_job(&job).await?;
        Ok(job)
    }

    async fn store_completion_result(
        &self,
        job: &Job,
        result: CompletionSlot,
    ) -> Result<(), EngineError> {
        self.purge_expired_results(100).await?;
        match result {
            CompletionSlot::Json(json) => self.put_small_result(job, json).await,
            CompletionSlot::Blob { storage_id, size } => {
                self.put_blob_result(job, storage_id, size).await
            }
        }
    }
}

/// `can_complete`: the job is held by this lease. The expiry may be in the
/// past — heartbeat/complete tolerate a just-expired lease while the id
/// still matches, because any reclaim rotates the id.
fn can_complete(job: &Job, lease_id: &str) -> bool {
    matches!(job.status, JobStatus::Leased | JobStatus::Running)
        && job.lease_id.as_deref() == Some(lease_id)
        && job.lease_expires_at.is_some()
}

/// Merge two `created_at`-ascending windows, ties going to the targeted
/// side.
fn merge_by_created_at(targeted: Vec<Job>, untargeted: Vec<Job>) -> Vec<Job> {
    let mut merged = Vec::with_capacity(targeted.len() + untargeted.len());
    let mut targeted = targeted.into_iter().peekable();
    let mut untargeted = untargeted.into_iter().peekable();
    loop {
        match (targeted.peek(), untargeted.peek()) {
            (Some(t), Some(u)) => {
                if t.created_at <= u.created_at {
                    merged.extend(targeted.next());
                } else {
                    merged.extend(untargeted.next());
                }
            }
            (Some(_), None) => merged.extend(targeted.next()),
            (None, Some(_)) => merged.extend(untargeted.next()),
            (None, None) => break,
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn job_at(created_at: chrono::DateTime<Utc>, target: Option<Uuid>) -> Job {
        Job {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            kind: "custom".to_owned(),
            payload_meta: None,
            payload_hash: None,
            target_runner_id: target,
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

    #[test]
    fn merge_prefers_targeted_on_ties() {
        let now = Utc::now();
        let runner = Uuid::new_v4();
        let targeted = vec![job_at(now, Some(runner))];
        let untargeted = vec![job_at(now - Duration::seconds(5), None), job_at(now, None)];
        let merged = merge_by_created_at(targeted.clone(), untargeted.clone());
        assert_eq!(merged.len(), 3);
        // Oldest untargeted first, then the tie resolves toward targeted.
        assert_eq!(merged[0].id, untargeted[0].id);
        assert_eq!(merged[1].id, targeted[0].id);
        assert_eq!(merged[2].id, untargeted[1].id);
    }

    #[test]
    fn lease_ttl_is_clamped() {
        assert_eq!(clamp_lease_ttl(None), Duration::milliseconds(30_000));
        assert_eq!(clamp_lease_ttl(Some(1)), Duration::milliseconds(5_000));
        assert_eq!(
            clamp_lease_ttl(Some(600_000)),
            Duration::milliseconds(120_000)
        );
    }

    #[test]
    fn can_complete_tolerates_expired_lease_with_matching_id() {
        let mut job = job_at(Utc::now(), None);
        job.status = JobStatus::Running;
        job.lease_id = Some("lease-1".to_owned());
        job.lease_expires_at = Some(Utc::now() - Duration::seconds(10));
        assert!(can_complete(&job, "lease-1"));
        assert!(!can_complete(&job, "lease-2"));

        job.lease_expires_at = None;
        assert!(!can_complete(&job, "lease-1"));
    }
}
