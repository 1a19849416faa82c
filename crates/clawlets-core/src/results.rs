//! Job result holders: small JSON envelopes and storage-backed blobs.
//!
//! Results live for five minutes and are read-once: the first successful
//! take consumes the newest unexpired row and deletes every duplicate, so
//! the next take returns nothing. The small/blob variants are disjoint —
//! a completing job picks one.

use chrono::Duration;
use clawlets_store::models::{CommandResult, CommandResultBlob, Job};
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::EngineError;

/// Result rows expire this long after insert.
pub const RESULT_TTL: Duration = Duration::minutes(5);

/// Small JSON results are capped at 512 KiB of UTF-8.
pub const MAX_SMALL_RESULT_BYTES: usize = 512 * 1024;

/// Blob results are capped at 5 MiB.
pub const MAX_BLOB_RESULT_BYTES: i64 = 5 * 1024 * 1024;

/// The result payload a completing job hands over — exactly one variant.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionSlot {
    Json(serde_json::Value),
    Blob { storage_id: String, size: i64 },
}

/// A consumed result.
#[derive(Debug, Clone, PartialEq)]
pub enum TakenResult {
    Json(serde_json::Value),
    Blob { storage_id: String, size: i64 },
}

impl Engine {
    /// Store a small JSON result for a completed job, replacing any prior
    /// rows for the same job.
    pub(crate) async fn put_small_result(
        &self,
        job: &Job,
        json: serde_json::Value,
    ) -> Result<(), EngineError> {
        if !json.is_object() {
            return Err(EngineError::Conflict(
                "result must be a JSON object".to_owned(),
            ));
        }
        // Canonicalize via stringify; the byte bound applies to that form.
        let canonical = serde_json::to_string(&json)
            .map_err(|e| EngineError::Conflict(format!("unencodable result: {e}")))?;
        if canonical.len() > MAX_SMALL_RESULT_BYTES {
            return Err(EngineError::Conflict(format!(
                "result exceeds {MAX_SMALL_RESULT_BYTES} bytes"
            )));
        }
        let json: serde_json::Value = serde_json::from_str(&canonical)
            .map_err(|e| EngineError::Conflict(format!("unparsable result: {e}")))?;

        for prior in self.store.list_command_results(job.id).await? {
            self.store.delete_command_result(prior.id).await?;
        }

        let now = self.now();
        self.store
            .insert_command_result(&CommandResult {
                id: Uuid::new_v4(),
                project_id: job.project_id,
                run_id: job.run_id,
                job_id: job.id,
                json,
                created_at: now,
                expires_at: now + RESULT_TTL,
            })
            .await?;
        Ok(())
    }

    /// Store a blob result reference, replacing prior blob rows (their
    /// backing blobs are deleted best-effort).
    pub(crate) async fn put_blob_result(
        &self,
        job: &Job,
        storage_id: String,
        size: i64,
    ) -> Result<(), EngineError> {
        if size <= 0 || size > MAX_BLOB_RESULT_BYTES {
            return Err(EngineError::Conflict(format!(
                "blob result size must be within (0, {MAX_BLOB_RESULT_BYTES}] bytes"
            )));
        }

        for prior in self.store.list_command_result_blobs(job.id).await? {
            self.store.delete_command_result_blob(prior.id).await?;
            self.delete_blob_best_effort(&prior.storage_id).await;
        }

        let now = self.now();
        self.store
            .insert_command_result_blob(&CommandResultBlob {
                id: Uuid::new_v4(),
                project_id: job.project_id,
                run_id: job.run_id,
                job_id: job.id,
                storage_id,
                size,
                created_at: now,
                expires_at: now + RESULT_TTL,
                consumed_at: None,
            })
            .await?;
        Ok(())
    }

    /// Read-once take of a job result scoped to `(project, run)`.
    ///
    /// Picks the newest unexpired row, deletes every other row for the job,
    /// and consumes the chosen one — the next take returns `None`.
    pub async fn take_result(
        &self,
        principal: Option<&str>,
        project_id: Uuid,
        run_id: Uuid,
        job_id: Uuid,
    ) -> Result<Option<TakenResult>, EngineError> {
        self.require_project_access(principal, project_id).await?;
        let now = self.now();

        let small = self.store.list_command_results(job_id).await?;
        let blobs = self.store.list_command_result_blobs(job_id).await?;

        let eligible_small = small
            .iter()
            .filter(|r| r.project_id == project_id && r.run_id == run_id && r.expires_at > now);
        let eligible_blob = blobs.iter().filter(|r| {
            r.project_id == project_id
                && r.run_id == run_id
                && r.expires_at > now
                && r.consumed_at.is_none()
        });

        // Newest across both variants wins; blobs win exact ties.
        let best_small = eligible_small.max_by_key(|r| r.created_at);
        let best_blob = eligible_blob.max_by_key(|r| r.created_at);
        let chosen: Option<TakenResult> = match (best_small, best_blob) {
            (Some(s), Some(b)) if s.created_at > b.created_at => Some(TakenResult::Json(s.json.clone())),
            (Some(s), None) => Some(TakenResult::Json(s.json.clone())),
            (_, Some(b)) => Some(TakenResult::Blob {
                storage_id: b.storage_id.clone(),
                size: b.size,
            }),
            (None, None) => None,
        };
        if chosen.is_none() {
            return Ok(None);
        }
        let chosen_small_id = match (&chosen, best_small) {
            (Some(TakenResult::Json(_)), Some(s)) => Some(s.id),
            _ => None,
        };
        let chosen_blob_id = match (&chosen, best_blob) {
            (Some(TakenResult::Blob { .. }), Some(b)) => Some(b.id),
            _ => None,
        };

        // Drop every duplicate, then consume the winner.
        for row in &small {
            if Some(row.id) != chosen_small_id {
                self.store.delete_command_result(row.id).await?;
            }
        }
        for row in &blobs {
            if Some(row.id) != chosen_blob_id {
                self.store.delete_command_result_blob(row.id).await?;
                self.delete_blob_best_effort(&row.storage_id).await;
            }
        }
        if let Some(id) = chosen_small_id {
            self.store.delete_command_result(id).await?;
        }
        if let Some(id) = chosen_blob_id {
            self.store.mark_blob_consumed(id, now).await?;
        }

        Ok(chosen)
    }

    /// Delete expired result rows in bounded batches; blob rows also drop
    /// their backing blobs best-effort. Returns rows deleted.
    pub async fn purge_expired_results(&self, limit: u32) -> Result<u64, EngineError> {
        let now = self.now();
        let small = self.store.purge_expired_command_results(now, limit).await?;
        let blob_ids = self
            .store
            .purge_expired_command_result_blobs(now, limit)
            .await?;
        for storage_id in &blob_ids {
            self.delete_blob_best_effort(storage_id).await;
        }
        Ok(small + blob_ids.len() as u64)
    }

    /// Blob-store deletes never fail the caller — the database row is
    /// authoritative and orphans are reconciled elsewhere.
    pub(crate) async fn delete_blob_best_effort(&self, storage_id: &str) {
        if let Err(e) = self.blobs.delete(storage_id).await {
            tracing::warn!(storage_id = %storage_id, error = %e, "blob delete failed");
        }
    }
}
