//! Run/project status projector.
//!
//! Every terminal job transition mirrors `{status, finished_at, error}` onto
//! the owning run. If the project is still `creating` and the run was the
//! init/import run, the project settles to `ready` or `error`. A project
//! that has left `creating` is never moved back.

use clawlets_store::models::{Job, JobStatus, ProjectStatus, RunStatus};

use crate::engine::Engine;
use crate::error::EngineError;

/// Run kinds that drive the `creating → {ready, error}` transition.
const PROJECT_SETUP_KINDS: &[&str] = &["project_init", "project_import"];

impl Engine {
    /// Mirror a terminal job onto its run, then settle the project status
    /// when the run was the project's setup run.
    pub(crate) async fn project_job_terminal(&self, job: &Job) -> Result<(), EngineError> {
        let run_status = match job.status {
            JobStatus::Succeeded => RunStatus::Succeeded,
            JobStatus::Failed => RunStatus::Failed,
            JobStatus::Canceled => RunStatus::Canceled,
            _ => return Ok(()),
        };
        let finished_at = job.finished_at.unwrap_or_else(|| self.now());
        // The job's stored error message has already been through the
        // redactor; mirror it verbatim.
        self.store
            .mark_run_terminal(job.run_id, run_status, finished_at, job.error_message.as_deref())
            .await?;

        let Some(run) = self.store.get_run(job.run_id).await? else {
            return Ok(());
        };
        if !PROJECT_SETUP_KINDS.contains(&run.kind.as_str()) {
            return Ok(());
        }
        let Some(project) = self.store.get_project(job.project_id).await? else {
            return Ok(());
        };
        if project.status != ProjectStatus::Creating {
            return Ok(());
        }
        let next = if run_status == RunStatus::Succeeded {
            ProjectStatus::Ready
        } else {
            ProjectStatus::Error
        };
        self.store
            .set_project_status(project.id, next, self.now())
            .await?;
        tracing::info!(project_id = %project.id, status = %next, "project settled");
        Ok(())
    }
}
