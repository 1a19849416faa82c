//! Setup drafts: pending-configuration scratchpads per `(project, host)`.
//!
//! A draft has two sealed sections — deploy credentials and bootstrap
//! secrets — each with its own expiry. Writes carry an optimistic version
//! counter; a mismatch conflicts. Expired sections read as absent.

use chrono::Duration;
use clawlets_store::models::{DraftSection, DraftStatus, SetupDraft};
use uuid::Uuid;

use crate::SEALED_INPUT_ALG;
use crate::engine::Engine;
use crate::error::EngineError;
use crate::validate::{ensure_bounded_string, validate_sealed_envelope};

/// Bootstrap secrets expire after a day; deploy credentials after a week.
const BOOTSTRAP_SECRETS_TTL: Duration = Duration::hours(24);
const DEPLOY_CREDS_TTL: Duration = Duration::days(7);

/// Which section of the draft a write addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftSectionKind {
    DeployCreds,
    BootstrapSecrets,
}

impl Engine {
    /// Write one sealed section of a setup draft (admin only).
    ///
    /// `expected_version` is the version read earlier; `0` means "no draft
    /// yet". Any mismatch conflicts and the caller re-reads.
    #[allow(clippy::too_many_arguments)]
    pub async fn put_draft_section(
        &self,
        principal: Option<&str>,
        project_id: Uuid,
        host_name: &str,
        section: DraftSectionKind,
        sealed_b64: &str,
        alg: &str,
        key_id: &str,
        expected_version: i64,
    ) -> Result<SetupDraft, EngineError> {
        self.require_project_admin(principal, project_id).await?;
        let host_name = ensure_bounded_string(host_name, "host_name", 253)?;
        validate_sealed_envelope(sealed_b64)?;
        if alg != SEALED_INPUT_ALG {
            return Err(EngineError::Conflict(format!(
                "unsupported sealed-input algorithm '{alg}'"
            )));
        }
        let key_id = ensure_bounded_string(key_id, "key_id", 128)?;

        let now = self.now();
        let existing = self.store.get_setup_draft(project_id, &host_name).await?;
        let current_version = existing.as_ref().map_or(0, |d| d.version);
        if current_version != expected_version {
            return Err(EngineError::Conflict(format!(
                "draft version conflict (have {current_version}, got {expected_version})"
            )));
        }

        let ttl = match section {
            DraftSectionKind::DeployCreds => DEPLOY_CREDS_TTL,
            DraftSectionKind::BootstrapSecrets => BOOTSTRAP_SECRETS_TTL,
        };
        let new_section = DraftSection {
            sealed_b64: sealed_b64.to_owned(),
            alg: alg.to_owned(),
            key_id,
            expires_at: now + ttl,
        };

        let mut draft = existing.unwrap_or(SetupDraft {
            id: Uuid::new_v4(),
            project_id,
            host_name,
            deploy_creds: None,
            bootstrap_secrets: None,
            version: 0,
            status: DraftStatus::Draft,
            updated_at: now,
        });
        match section {
            DraftSectionKind::DeployCreds => draft.deploy_creds = Some(new_section),
            DraftSectionKind::BootstrapSecrets => draft.bootstrap_secrets = Some(new_section),
        }
        draft.version += 1;
        draft.status = DraftStatus::Draft;
        draft.updated_at = now;
        self.store.put_setup_draft(&draft).await?;
        Ok(draft)
    }

    /// Read a setup draft; expired sections come back as `None`.
    pub async fn get_setup_draft(
        &self,
        principal: Option<&str>,
        project_id: Uuid,
        host_name: &str,
    ) -> Result<Option<SetupDraft>, EngineError> {
        self.require_project_access(principal, project_id).await?;
        let now = self.now();
        let draft = self.store.get_setup_draft(project_id, host_name).await?;
        Ok(draft.map(|mut draft| {
            if draft.deploy_creds.as_ref().is_some_and(|s| s.expires_at <= now) {
                draft.deploy_creds = None;
            }
            if draft
                .bootstrap_secrets
                .as_ref()
                .is_some_and(|s| s.expires_at <= now)
            {
                draft.bootstrap_secrets = None;
            }
            draft
        }))
    }

    /// Move a draft into `committing` (admin only, version-checked).
    pub async fn begin_draft_commit(
        &self,
        principal: Option<&str>,
        project_id: Uuid,
        host_name: &str,
        expected_version: i64,
    ) -> Result<SetupDraft, EngineError> {
        self.require_project_admin(principal, project_id).await?;
        let mut draft = self
            .store
            .get_setup_draft(project_id, host_name)
            .await?
            .ok_or_else(|| EngineError::NotFound("setup draft not found".to_owned()))?;
        if draft.version != expected_version {
            return Err(EngineError::Conflict(format!(
                "draft version conflict (have {}, got {expected_version})",
                draft.version
            )));
        }
        if draft.status != DraftStatus::Draft {
            return Err(EngineError::Conflict(format!(
                "draft is not committable from status {:?}",
                draft.status
            )));
        }
        draft.status = DraftStatus::Committing;
        draft.version += 1;
        draft.updated_at = self.now();
        self.store.put_setup_draft(&draft).await?;
        Ok(draft)
    }

    /// Settle a `committing` draft to `committed` or `failed`.
    pub async fn finish_draft_commit(
        &self,
        principal: Option<&str>,
        project_id: Uuid,
        host_name: &str,
        success: bool,
    ) -> Result<SetupDraft, EngineError> {
        self.require_project_admin(principal, project_id).await?;
        let mut draft = self
            .store
            .get_setup_draft(project_id, host_name)
            .await?
            .ok_or_else(|| EngineError::NotFound("setup draft not found".to_owned()))?;
        if draft.status != DraftStatus::Committing {
            return Err(EngineError::Conflict(
                "draft is not mid-commit".to_owned(),
            ));
        }
        draft.status = if success {
            DraftStatus::Committed
        } else {
            DraftStatus::Failed
        };
        draft.version += 1;
        draft.updated_at = self.now();
        self.store.put_setup_draft(&draft).await?;
        Ok(draft)
    }
}
