//! Tenant-scoped erasure.
//!
//! Deletion is a two-phase protocol: `delete_start` mints a one-shot token
//! (15-minute TTL, SHA-256 at rest), `delete_confirm` checks the exact
//! confirmation string plus the token in constant time and creates a staged
//! erasure job. A lease-guarded step worker then walks the fixed table
//! order in 200-row batches until the project row itself is gone.

use chrono::{DateTime, Duration, Utc};
use clawlets_store::models::{DeletionJob, DeletionJobStatus, DeletionToken};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{AuditEvent, DeleteStartData};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::scheduler::ScheduledCall;
use crate::util::{constant_time_eq, random_token, sha256_hex};

/// Deletion tokens live this long.
pub const DELETION_TOKEN_TTL: Duration = Duration::minutes(15);

const STEP_LEASE: Duration = Duration::seconds(60);
const STEP_DELAY: std::time::Duration = std::time::Duration::from_millis(500);
const STAGE_BATCH: u64 = 200;

/// The fixed, ordered list of erasure stages. Dependency order: child rows
/// first, the project row second to last, then `done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErasureStage {
    RunEvents,
    Runs,
    Providers,
    ProjectConfigs,
    Hosts,
    Gateways,
    SecretWiring,
    Jobs,
    CommandResultBlobs,
    CommandResults,
    RunnerTokens,
    Runners,
    ProjectCredentials,
    ProjectMembers,
    AuditLogs,
    ProjectPolicies,
    DeletionTokens,
    Project,
    Done,
}

impl ErasureStage {
    /// The stage after this one; `Done` is absorbing.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::RunEvents => Self::Runs,
            Self::Runs => Self::Providers,
            Self::Providers => Self::ProjectConfigs,
            Self::ProjectConfigs => Self::Hosts,
            Self::Hosts => Self::Gateways,
            Self::Gateways => Self::SecretWiring,
            Self::SecretWiring => Self::Jobs,
            Self::Jobs => Self::CommandResultBlobs,
            Self::CommandResultBlobs => Self::CommandResults,
            Self::CommandResults => Self::RunnerTokens,
            Self::RunnerTokens => Self::Runners,
            Self::Runners => Self::ProjectCredentials,
            Self::ProjectCredentials => Self::ProjectMembers,
            Self::ProjectMembers => Self::AuditLogs,
            Self::AuditLogs => Self::ProjectPolicies,
            Self::ProjectPolicies => Self::DeletionTokens,
            Self::DeletionTokens => Self::Project,
            Self::Project => Self::Done,
            Self::Done => Self::Done,
        }
    }
}

impl std::fmt::Display for ErasureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match serde_json::to_value(self) {
            Ok(serde_json::Value::String(s)) => s,
            _ => "done".to_owned(),
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ErasureStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_owned()))
            .map_err(|_| format!("unknown erasure stage: {s}"))
    }
}

/// Plaintext deletion token plus its deadline, returned exactly once.
#[derive(Debug, Clone)]
pub struct DeleteStartOutcome {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Engine {
    /// Phase one: mint a deletion token for the project (admin only).
    ///
    /// Any previously issued tokens for the project are destroyed first.
    pub async fn delete_start(
        &self,
        principal: Option<&str>,
        project_id: Uuid,
    ) -> Result<DeleteStartOutcome, EngineError> {
        let access = self.require_project_admin(principal, project_id).await?;
        self.check_rate_limit(
            &format!("projects.delete:{}", access.principal),
            5,
            Duration::minutes(1),
        )
        .await?;

        self.store.delete_deletion_tokens(project_id).await?;

        let now = self.now();
        let plaintext = random_token();
        let expires_at = now + DELETION_TOKEN_TTL;
        self.store
            .insert_deletion_token(&DeletionToken {
                id: Uuid::new_v4(),
                project_id,
                token_hash: sha256_hex(plaintext.as_bytes()),
                expires_at,
                created_at: now,
            })
            .await?;

        self.append_audit(
            &access.principal,
            Some(project_id),
            AuditEvent::ProjectDeleteStart {
                data: DeleteStartData { expires_at },
            },
        )
        .await?;

        Ok(DeleteStartOutcome {
            token: plaintext,
            expires_at,
        })
    }

    /// Phase two: confirm with the exact string `delete <project name>` and
    /// the phase-one token, then create the staged erasure job.
    pub async fn delete_confirm(
        &self,
        principal: Option<&str>,
        project_id: Uuid,
        token: &str,
        confirmation: &str,
    ) -> Result<DeletionJob, EngineError> {
        let access = self.require_project_admin(principal, project_id).await?;
        self.check_rate_limit(
            &format!("projects.delete:{}", access.principal),
            5,
            Duration::minutes(1),
        )
        .await?;

        let expected = format!("delete {}", access.project.name);
        if confirmation.trim() != expected {
            return Err(EngineError::Conflict(
                "confirmation string does not match".to_owned(),
            ));
        }

        // Compare against every stored token without short-circuiting.
        let now = self.now();
        let presented_hash = sha256_hex(token.trim().as_bytes());
        let mut matched = false;
        for stored in self.store.list_deletion_tokens(project_id).await? {
            let usable = stored.expires_at > now;
            let equal = constant_time_eq(&presented_hash, &stored.token_hash);
            matched |= usable && equal;
        }
        if !matched {
            return Err(EngineError::Conflict(
                "invalid or expired deletion token".to_owned(),
            ));
        }

        if self.store.get_active_deletion_job(project_id).await?.is_some() {
            return Err(EngineError::Conflict(
                "project deletion already in progress".to_owned(),
            ));
        }

        let job = DeletionJob {
            id: Uuid::new_v4(),
            project_id,
            requested_by: access.principal.clone(),
            status: DeletionJobStatus::Pending,
            stage: ErasureStage::RunEvents.to_string(),
            processed: 0,
            lease_id: None,
            lease_expires_at: None,
            last_error: None,
            created_at: now,
            completed_at: None,
        };
        self.store.insert_deletion_job(&job).await?;
        self.store.delete_deletion_tokens(project_id).await?;

        self.append_audit(&access.principal, Some(project_id), AuditEvent::ProjectDeleteConfirm)
            .await?;
        self.scheduler.run_after(
            STEP_DELAY,
            ScheduledCall::ErasureStep {
                deletion_job_id: job.id,
            },
        );

        tracing::info!(project_id = %project_id, job_id = %job.id, "project erasure confirmed");
        Ok(job)
    }

    /// One lease-guarded erasure step: delete a batch of the current
    /// stage's rows, advance the stage when drained, reschedule until done.
    pub async fn run_deletion_job_step(&self, deletion_job_id: Uuid) -> Result<(), EngineError> {
        let Some(job) = self.store.get_deletion_job(deletion_job_id).await? else {
            return Ok(());
        };
        if job.status.is_terminal() {
            return Ok(());
        }
        let now = self.now();
        if job.lease_expires_at.is_some_and(|exp| exp > now) {
            // Another worker holds the step lease.
            return Ok(());
        }

        // Acquire and verify ownership by read-back.
        let token = random_token();
        let mut claimed = job;
        claimed.status = DeletionJobStatus::Running;
        claimed.lease_id = Some(token.clone());
        claimed.lease_expires_at = Some(now + STEP_LEASE);
        self.store.update_deletion_job(&claimed).await?;
        let Some(mut job) = self.store.get_deletion_job(deletion_job_id).await? else {
            return Ok(());
        };
        if job.lease_id.as_deref() != Some(token.as_str()) {
            return Ok(());
        }

        let stage: ErasureStage = match job.stage.parse() {
            Ok(stage) => stage,
            Err(message) => {
                return self.fail_deletion_job(job, &message).await;
            }
        };

        match self.delete_stage_batch(job.project_id, stage).await {
            Ok(deleted) => {
                let mut stage = stage;
                if deleted < STAGE_BATCH {
                    stage = stage.next();
                }
                let done = stage == ErasureStage::Done;
                job.processed += i64::try_from(deleted).unwrap_or(i64::MAX);
                job.stage = stage.to_string();
                job.status = if done {
                    DeletionJobStatus::Completed
                } else {
                    DeletionJobStatus::Pending
                };
                job.completed_at = done.then(|| self.now());
                job.lease_id = None;
                job.lease_expires_at = None;
                self.store.update_deletion_job(&job).await?;
                if done {
                    tracing::info!(job_id = %job.id, processed = job.processed, "project erasure completed");
                } else {
                    self.scheduler.run_after(
                        STEP_DELAY,
                        ScheduledCall::ErasureStep {
                            deletion_job_id: job.id,
                        },
                    );
                }
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                self.fail_deletion_job(job, &message).await?;
                Err(e)
            }
        }
    }

    /// Erasure status, readable by project admins — or, once the project
    /// row is gone, by the principal that confirmed the deletion.
    pub async fn deletion_status(
        &self,
        principal: Option<&str>,
        project_id: Uuid,
    ) -> Result<DeletionJob, EngineError> {
        let job = self
            .store
            .get_latest_deletion_job(project_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("no deletion job for project".to_owned()))?;

        if self.store.get_project(project_id).await?.is_some() {
            self.require_project_admin(principal, project_id).await?;
        } else {
            let principal = self.resolve_principal(principal)?;
            if !self.auth_disabled && job.requested_by != principal {
                return Err(EngineError::Forbidden(
                    "only the requester may read this deletion".to_owned(),
                ));
            }
        }
        Ok(job)
    }

    async fn fail_deletion_job(
        &self,
        mut job: DeletionJob,
        message: &str,
    ) -> Result<(), EngineError> {
        tracing::error!(job_id = %job.id, error = %message, "erasure step failed");
        job.status = DeletionJobStatus::Failed;
        job.last_error = Some(message.to_owned());
        job.lease_id = None;
        job.lease_expires_at = None;
        self.store.update_deletion_job(&job).await?;
        Ok(())
    }

    /// Delete up to one batch of the stage's rows for the project.
    async fn delete_stage_batch(
        &self,
        project_id: Uuid,
        stage: ErasureStage,
    ) -> Result<u64, EngineError> {
        let limit = STAGE_BATCH as u32;
        let deleted = match stage {
            ErasureStage::RunEvents => self.store.purge_run_events(project_id, limit).await?,
            ErasureStage::Runs => self.store.purge_runs(project_id, limit).await?,
            ErasureStage::Providers => self.store.purge_providers(project_id, limit).await?,
            // Setup drafts are pending configuration; they go with the
            // config stage so no project-scoped row survives erasure.
            ErasureStage::ProjectConfigs => {
                let configs = self.store.purge_project_configs(project_id, limit).await?;
                let remaining = u64::from(limit).saturating_sub(configs);
                let drafts = if remaining > 0 {
                    self.store
                        .purge_setup_drafts(project_id, remaining as u32)
                        .await?
                } else {
                    0
                };
                configs + drafts
            }
            ErasureStage::Hosts => self.store.purge_hosts(project_id, limit).await?,
            ErasureStage::Gateways => self.store.purge_gateways(project_id, limit).await?,
            ErasureStage::SecretWiring => {
                self.store.purge_secret_wiring(project_id, limit).await?
            }
            ErasureStage::Jobs => self.store.purge_jobs(project_id, limit).await?,
            ErasureStage::CommandResultBlobs => {
                let storage_ids = self
                    .store
                    .purge_command_result_blobs(project_id, limit)
                    .await?;
                for storage_id in &storage_ids {
                    self.delete_blob_best_effort(storage_id).await;
                }
                storage_ids.len() as u64
            }
            ErasureStage::CommandResults => {
                self.store.purge_command_results(project_id, limit).await?
            }
            ErasureStage::RunnerTokens => {
                self.store.purge_runner_tokens(project_id, limit).await?
            }
            ErasureStage::Runners => self.store.purge_runners(project_id, limit).await?,
            ErasureStage::ProjectCredentials => {
                self.store.purge_project_credentials(project_id, limit).await?
            }
            ErasureStage::ProjectMembers => self.store.purge_members(project_id, limit).await?,
            ErasureStage::AuditLogs => self.store.purge_audit_logs(project_id, limit).await?,
            ErasureStage::ProjectPolicies => {
                self.store.purge_policies(project_id, limit).await?
            }
            ErasureStage::DeletionTokens => {
                self.store.purge_deletion_tokens(project_id, limit).await?
            }
            ErasureStage::Project => u64::from(self.store.delete_project(project_id).await?),
            ErasureStage::Done => 0,
        };
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order_ends_at_project_then_done() {
        let mut stage = ErasureStage::RunEvents;
        let mut seen = vec![stage];
        while stage != ErasureStage::Done {
            stage = stage.next();
            seen.push(stage);
        }
        assert_eq!(seen.len(), 19);
        assert_eq!(seen[seen.len() - 2], ErasureStage::Project);
        assert_eq!(ErasureStage::Done.next(), ErasureStage::Done);
    }

    #[test]
    fn stage_names_roundtrip() {
        let stage = ErasureStage::CommandResultBlobs;
        let name = stage.to_string();
        assert_eq!(name, "command_result_blobs");
        assert_eq!(name.parse::<ErasureStage>().unwrap(), stage);
        assert!("bogus".parse::<ErasureStage>().is_err());
    }
}
