//! Metered retention GC.
//!
//! A single sweeper walks `project_policies` in project-id order behind a
//! lease-stamped singleton cursor row, deleting run events, audit logs, and
//! terminal runs older than each project's cutoff. Passes are bounded by a
//! per-project budget (200 deletes) and a global budget (1000 deletes);
//! unfinished work persists the cursor and schedules a continuation under
//! the same lease. Restart-safe and self-throttling.

use chrono::Duration;
use clawlets_store::models::RetentionSweep;
use serde::Serialize;
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::scheduler::ScheduledCall;
use crate::util::random_token;

const SWEEP_KEY: &str = "default";
const SWEEP_LEASE: Duration = Duration::seconds(60);
const CONTINUE_DELAY: std::time::Duration = std::time::Duration::from_secs(5);
const POLICY_PAGE: u32 = 25;
const PROJECT_BUDGET: u64 = 200;
const GLOBAL_BUDGET: u64 = 1_000;
const DELETE_BATCH: u64 = 100;
const RUNS_PAGE: u32 = 50;

/// What one sweep pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionSummary {
    pub projects_scanned: u64,
    pub run_events_deleted: u64,
    pub audit_logs_deleted: u64,
    pub runs_deleted: u64,
    /// A continuation was scheduled because budget or the policy page ran
    /// out before the walk finished.
    pub continued: bool,
}

/// Budget pair: deletes are charged to both at once.
struct Budget {
    project: u64,
    global: u64,
}

impl Budget {
    fn batch(&self) -> u64 {
        self.project.min(self.global).min(DELETE_BATCH)
    }

    fn charge(&mut self, n: u64) {
        self.project = self.project.saturating_sub(n);
        self.global = self.global.saturating_sub(n);
    }

    fn empty(&self) -> bool {
        self.project == 0 || self.global == 0
    }
}

impl Engine {
    /// Run one retention sweep pass.
    ///
    /// No-ops when another holder's lease is active. `lease_id` is passed
    /// by scheduled continuations so they re-enter their own lease.
    pub async fn run_retention_sweep(
        &self,
        reason: Option<&str>,
        lease_id: Option<&str>,
    ) -> Result<RetentionSummary, EngineError> {
        let now = self.now();
        let existing = self.store.get_retention_sweep(SWEEP_KEY).await?;
        if let Some(row) = &existing {
            let active = row.lease_expires_at.is_some_and(|exp| exp > now);
            let held_by_caller =
                lease_id.is_some() && row.lease_id.as_deref() == lease_id;
            if active && !held_by_caller {
                tracing::debug!("retention sweep lease held elsewhere, skipping");
                return Ok(RetentionSummary::default());
            }
        }

        // Acquire (or renew) with a fresh token and verify by read-back.
        let token = random_token();
        let cursor = existing.and_then(|row| row.cursor);
        self.store
            .put_retention_sweep(&RetentionSweep {
                key: SWEEP_KEY.to_owned(),
                cursor,
                lease_id: Some(token.clone()),
                lease_expires_at: Some(now + SWEEP_LEASE),
            })
            .await?;
        let readback = self.store.get_retention_sweep(SWEEP_KEY).await?;
        if readback.and_then(|row| row.lease_id).as_deref() != Some(token.as_str()) {
            return Ok(RetentionSummary::default());
        }

        let mut summary = RetentionSummary::default();
        let mut global_remaining = GLOBAL_BUDGET;

        // One sentinel row past the page detects more work.
        let page = self
            .store
            .list_policies_after(cursor, POLICY_PAGE + 1)
            .await?;
        let has_more_pages = page.len() as u32 > POLICY_PAGE;
        let policies = &page[..page.len().min(POLICY_PAGE as usize)];

        let mut next_cursor = cursor;
        let mut exhausted = false;
        for policy in policies {
            if global_remaining == 0 {
                exhausted = true;
                break;
            }
            summary.projects_scanned += 1;
            let days = policy.retention_days.clamp(1, 365);
            let cutoff = now - Duration::days(days);
            let mut budget = Budget {
                project: PROJECT_BUDGET,
                global: global_remaining,
            };

            let drained = self
                .sweep_project(policy.project_id, cutoff, &mut budget, &mut summary)
                .await?;
            global_remaining = budget.global;

            if drained {
                next_cursor = Some(policy.project_id);
            } else {
                // Out of budget mid-project; resume here next pass.
                exhausted = true;
                break;
            }
        }

        let more = exhausted || has_more_pages;
        if more {
            self.store
                .put_retention_sweep(&RetentionSweep {
                    key: SWEEP_KEY.to_owned(),
                    cursor: next_cursor,
                    lease_id: Some(token.clone()),
                    lease_expires_at: Some(self.now() + SWEEP_LEASE),
                })
                .await?;
            self.scheduler.run_after(
                CONTINUE_DELAY,
                ScheduledCall::RetentionSweep {
                    lease_id: Some(token),
                },
            );
            summary.continued = true;
        } else {
            self.store
                .put_retention_sweep(&RetentionSweep {
                    key: SWEEP_KEY.to_owned(),
                    cursor: None,
                    lease_id: None,
                    lease_expires_at: None,
                })
                .await?;
        }

        tracing::info!(
            reason = reason.unwrap_or("timer"),
            projects = summary.projects_scanned,
            run_events = summary.run_events_deleted,
            audit_logs = summary.audit_logs_deleted,
            runs = summary.runs_deleted,
            continued = summary.continued,
            "retention sweep pass finished"
        );
        Ok(summary)
    }

    /// Apply the cutoff to one project. Returns whether the project was
    /// fully drained within budget.
    async fn sweep_project(
        &self,
        project_id: Uuid,
        cutoff: chrono::DateTime<chrono::Utc>,
        budget: &mut Budget,
        summary: &mut RetentionSummary,
    ) -> Result<bool, EngineError> {
        // 1. Run events older than the cutoff.
        loop {
            let batch = budget.batch();
            if batch == 0 {
                return Ok(false);
            }
            let deleted = self
                .store
                .delete_run_events_before(project_id, cutoff, batch as u32)
                .await?;
            summary.run_events_deleted += deleted;
            budget.charge(deleted);
            if deleted < batch {
                break;
            }
        }

        // 2. Audit logs older than the cutoff.
        loop {
            let batch = budget.batch();
            if batch == 0 {
                return Ok(false);
            }
            let deleted = self
                .store
                .delete_audit_before(project_id, cutoff, batch as u32)
                .await?;
            summary.audit_logs_deleted += deleted;
            budget.charge(deleted);
            if deleted < batch {
                break;
            }
        }

        // 3. Terminal runs started before the cutoff: events first, then
        //    the run row itself.
        loop {
            if budget.empty() {
                return Ok(false);
            }
            let runs = self
                .store
                .list_terminal_runs_started_before(project_id, cutoff, RUNS_PAGE)
                .await?;
            if runs.is_empty() {
                break;
            }
            for run in &runs {
                loop {
                    let batch = budget.batch();
                    if batch == 0 {
                        return Ok(false);
                    }
                    let deleted = self
                        .store
                        .delete_run_events_for_run(run.id, batch as u32)
                        .await?;
                    summary.run_events_deleted += deleted;
                    budget.charge(deleted);
                    if deleted < batch {
                        break;
                    }
                }
                if budget.empty() {
                    return Ok(false);
                }
                self.store.delete_run(run.id).await?;
                summary.runs_deleted += 1;
                budget.charge(1);
            }
            if (runs.len() as u32) < RUNS_PAGE {
                break;
            }
        }

        Ok(true)
    }
}
