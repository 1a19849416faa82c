//! Append-only audit history of privileged operator actions.
//!
//! The action taxonomy is closed: every action carries exactly the target
//! and data shape its variant declares, unknown keys are rejected at the
//! serde layer, and repo-relative paths plus string arrays are validated
//! before insert. On read, two sensitive actions have their stored data
//! rewritten to a fixed safe shape.

use clawlets_store::models::AuditLogEntry;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::util::sha256_hex;
use crate::validate::{ensure_bounded_string, validate_repo_path};

const MAX_ARRAY_ITEMS: usize = 200;
const MAX_ARRAY_ITEM_LEN: usize = 256;

// ── Target shapes ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobTarget {
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerTarget {
    pub runner_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenTarget {
    pub token_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostTarget {
    pub host_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemberTarget {
    pub user_id: String,
}

// ── Data shapes ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectCreateData {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeleteStartData {
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobsEnqueueData {
    pub kind: String,
    pub run_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SealedReserveData {
    pub kind: String,
    pub target_runner_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerRegisterData {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenCreateData {
    pub runner_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemberData {
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionPolicyData {
    pub retention_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployCredsUpdateData {
    pub operator_id: Option<String>,
    /// Repo-relative paths the credentials were written to.
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SopsOperatorKeyData {
    pub operator_id: String,
    pub recipients: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MaintenanceSweepData {
    pub reason: String,
}

// ── The taxonomy ─────────────────────────────────────────────────────

/// Closed set of auditable actions with their required shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum AuditEvent {
    #[serde(rename = "project.create")]
    ProjectCreate { data: ProjectCreateData },
    #[serde(rename = "project.delete.start")]
    ProjectDeleteStart { data: DeleteStartData },
    #[serde(rename = "project.delete.confirm")]
    ProjectDeleteConfirm,
    #[serde(rename = "jobs.enqueue")]
    JobsEnqueue { target: JobTarget, data: JobsEnqueueData },
    #[serde(rename = "jobs.cancel")]
    JobsCancel { target: JobTarget },
    #[serde(rename = "jobs.sealedReserve")]
    JobsSealedReserve { target: JobTarget, data: SealedReserveData },
    #[serde(rename = "jobs.sealedFinalize")]
    JobsSealedFinalize { target: JobTarget },
    #[serde(rename = "runner.register")]
    RunnerRegister { target: RunnerTarget, data: RunnerRegisterData },
    #[serde(rename = "runnerToken.create")]
    RunnerTokenCreate { target: TokenTarget, data: TokenCreateData },
    #[serde(rename = "runnerToken.revoke")]
    RunnerTokenRevoke { target: TokenTarget },
    #[serde(rename = "member.add")]
    MemberAdd { target: MemberTarget, data: MemberData },
    #[serde(rename = "retentionPolicy.update")]
    RetentionPolicyUpdate { data: RetentionPolicyData },
    #[serde(rename = "deployCreds.update")]
    DeployCredsUpdate { target: HostTarget, data: DeployCredsUpdateData },
    #[serde(rename = "sops.operatorKey.generate")]
    SopsOperatorKeyGenerate { data: SopsOperatorKeyData },
    #[serde(rename = "maintenance.retentionSweep")]
    MaintenanceRetentionSweep { data: MaintenanceSweepData },
}

/// Actions whose stored data is rewritten to a fixed safe shape on read.
const SENSITIVE_ACTIONS: &[&str] = &["deployCreds.update", "sops.operatorKey.generate"];

fn validate_string_array(items: &[String], field: &str) -> Result<(), EngineError> {
    if items.len() > MAX_ARRAY_ITEMS {
        return Err(EngineError::Conflict(format!(
            "{field} holds more than {MAX_ARRAY_ITEMS} entries"
        )));
    }
    for item in items {
        ensure_bounded_string(item, field, MAX_ARRAY_ITEM_LEN)?;
    }
    Ok(())
}

impl AuditEvent {
    /// Shape checks beyond what serde enforces.
    fn validate(&self) -> Result<(), EngineError> {
        match self {
            Self::DeployCredsUpdate { target, data } => {
                ensure_bounded_string(&target.host_name, "host_name", 253)?;
                validate_string_array(&data.paths, "paths")?;
                for path in &data.paths {
                    validate_repo_path(path, "paths")?;
                }
                if let Some(operator_id) = &data.operator_id {
                    ensure_bounded_string(operator_id, "operator_id", 128)?;
                }
                Ok(())
            }
            Self::SopsOperatorKeyGenerate { data } => {
                ensure_bounded_string(&data.operator_id, "operator_id", 128)?;
                validate_string_array(&data.recipients, "recipients")
            }
            Self::RunnerRegister { data, .. } => {
                ensure_bounded_string(&data.name, "name", 128).map(|_| ())
            }
            Self::MemberAdd { target, .. } => {
                ensure_bounded_string(&target.user_id, "user_id", 128).map(|_| ())
            }
            _ => Ok(()),
        }
    }

    /// Split the event into the row columns `(action, target, data)`.
    fn into_parts(
        self,
    ) -> Result<(String, Option<serde_json::Value>, Option<serde_json::Value>), EngineError> {
        let value = serde_json::to_value(&self)
            .map_err(|e| EngineError::Conflict(format!("unencodable audit event: {e}")))?;
        let serde_json::Value::Object(mut map) = value else {
            return Err(EngineError::Conflict("malformed audit event".to_owned()));
        };
        let action = map
            .remove("action")
            .and_then(|v| v.as_str().map(ToOwned::to_owned))
            .ok_or_else(|| EngineError::Conflict("audit event without action".to_owned()))?;
        Ok((action, map.remove("target"), map.remove("data")))
    }
}

/// Rewrite the stored data of a sensitive action to its fixed safe shape,
/// hashing any bare operator id.
fn rewrite_sensitive_data(entry: &mut AuditLogEntry) {
    if !SENSITIVE_ACTIONS.contains(&entry.action.as_str()) {
        return;
    }
    let operator_hash = entry
        .data
        .as_ref()
        .and_then(|d| d.get("operator_id"))
        .and_then(serde_json::Value::as_str)
        .map(|id| sha256_hex(id.as_bytes()));
    let mut safe = serde_json::Map::new();
    safe.insert("redacted".to_owned(), serde_json::Value::Bool(true));
    if let Some(hash) = operator_hash {
        safe.insert("operator_key_ref".to_owned(), serde_json::Value::String(hash));
    }
    entry.data = Some(serde_json::Value::Object(safe));
}

impl Engine {
    /// Validate and append an audit row.
    pub(crate) async fn append_audit(
        &self,
        user_id: &str,
        project_id: Option<Uuid>,
        event: AuditEvent,
    ) -> Result<(), EngineError> {
        event.validate()?;
        let (action, target, data) = event.into_parts()?;
        let entry = AuditLogEntry {
            id: Uuid::new_v4(),
            ts: self.now(),
            user_id: user_id.to_owned(),
            project_id,
            action,
            target,
            data,
        };
        self.store.insert_audit(&entry).await?;
        Ok(())
    }

    /// Admin-readable audit page, newest first. Sensitive actions come back
    /// with their data replaced by the fixed safe shape.
    pub async fn list_audit_page(
        &self,
        principal: Option<&str>,
        project_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<AuditLogEntry>, EngineError> {
        self.require_project_admin(principal, project_id).await?;
        let limit = limit.clamp(1, 200);
        let mut entries = self.store.list_audit(project_id, limit, offset).await?;
        for entry in &mut entries {
            rewrite_sensitive_data(entry);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_split_into_row_parts() {
        let event = AuditEvent::JobsEnqueue {
            target: JobTarget { job_id: Uuid::new_v4() },
            data: JobsEnqueueData {
                kind: "custom".to_owned(),
                run_id: Uuid::new_v4(),
            },
        };
        let (action, target, data) = event.into_parts().unwrap();
        assert_eq!(action, "jobs.enqueue");
        assert!(target.is_some());
        assert_eq!(data.unwrap()["kind"], "custom");

        let (action, target, data) = AuditEvent::ProjectDeleteConfirm.into_parts().unwrap();
        assert_eq!(action, "project.delete.confirm");
        assert!(target.is_none());
        assert!(data.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let raw = serde_json::json!({
            "action": "jobs.cancel",
            "target": { "job_id": Uuid::new_v4(), "extra": 1 }
        });
        assert!(serde_json::from_value::<AuditEvent>(raw).is_err());
    }

    #[test]
    fn deploy_creds_paths_are_validated() {
        let event = AuditEvent::DeployCredsUpdate {
            target: HostTarget { host_name: "web-1".to_owned() },
            data: DeployCredsUpdateData {
                operator_id: Some("op-1".to_owned()),
                paths: vec!["/etc/creds".to_owned()],
            },
        };
        assert!(event.validate().is_err());

        let event = AuditEvent::DeployCredsUpdate {
            target: HostTarget { host_name: "web-1".to_owned() },
            data: DeployCredsUpdateData {
                operator_id: None,
                paths: vec!["secrets/web-1.yaml".to_owned()],
            },
        };
        assert!(event.validate().is_ok());
    }

    #[test]
    fn sensitive_data_is_rewritten_on_read() {
        let mut entry = AuditLogEntry {
            id: Uuid::new_v4(),
            ts: chrono::Utc::now(),
            user_id: "alice".to_owned(),
            project_id: None,
            action: "sops.operatorKey.generate".to_owned(),
            target: None,
            data: Some(serde_json::json!({
                "operator_id": "op-1",
                "recipients": ["age1abc"]
            })),
        };
        rewrite_sensitive_data(&mut entry);
        let data = entry.data.unwrap();
        assert_eq!(data["redacted"], true);
        assert_eq!(
            data["operator_key_ref"],
            sha256_hex(b"op-1").as_str()
        );
        assert!(data.get("recipients").is_none());
    }
}
