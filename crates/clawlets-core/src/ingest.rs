//! Runner metadata ingest.
//!
//! Metadata sync upserts runner-reported hosts, gateways, config-sync rows,
//! and secret wiring by their natural keys. There is no compare-and-set:
//! the runner's view is the source of truth, so concurrent upserts for the
//! same key are last-writer-wins. The whole sync conflicts while an erasure
//! job for the project is active.

use std::collections::HashMap;

use clawlets_store::models::{GatewayRow, HostRow, ProjectConfigRow, SecretWiringRow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::runner_auth::RunnerIdentity;
use crate::validate::{
    RawGatewaySummary, RawHostSummary, RunEventInput, ensure_bounded_string,
    sanitize_desired_gateway_summary, sanitize_desired_host_summary,
    sanitize_runner_run_events_for_storage, validate_repo_path,
};

/// Shape caps for one metadata-sync call.
const MAX_CONFIGS: usize = 500;
const MAX_HOSTS: usize = 200;
const MAX_GATEWAYS: usize = 500;
const MAX_WIRING_TOTAL: usize = 2_000;
const MAX_WIRING_PER_HOST: usize = 500;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSyncEntry {
    pub name: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSyncEntry {
    pub host_name: String,
    #[serde(default)]
    pub summary: RawHostSummary,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySyncEntry {
    pub host_name: String,
    pub gateway_id: String,
    #[serde(default)]
    pub summary: RawGatewaySummary,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretWiringSyncEntry {
    pub host_name: String,
    pub secret_name: String,
    pub target_path: String,
}

/// One metadata-sync call, pre-shape-validated at the HTTP layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MetadataSyncRequest {
    pub project_configs: Vec<ConfigSyncEntry>,
    pub hosts: Vec<HostSyncEntry>,
    pub gateways: Vec<GatewaySyncEntry>,
    pub secret_wiring: Vec<SecretWiringSyncEntry>,
}

/// Upserted-row counts returned to the runner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetadataSyncCounts {
    pub project_configs: u64,
    pub hosts: u64,
    pub gateways: u64,
    pub secret_wiring: u64,
}

impl Engine {
    /// Sanitize and upsert one metadata-sync payload.
    pub async fn sync_runner_metadata(
        &self,
        identity: &RunnerIdentity,
        request: &MetadataSyncRequest,
    ) -> Result<MetadataSyncCounts, EngineError> {
        let project_id = identity.runner.project_id;
        if self.store.get_active_deletion_job(project_id).await?.is_some() {
            return Err(EngineError::Conflict(
                "project deletion in progress".to_owned(),
            ));
        }
        check_shape_caps(request)?;

        let now = self.now();
        let mut counts = MetadataSyncCounts::default();

        for entry in &request.project_configs {
            let name = ensure_bounded_string(&entry.name, "project_configs.name", 256)?;
            let content_hash =
                ensure_bounded_string(&entry.content_hash, "project_configs.content_hash", 128)?;
            self.store
                .upsert_project_config(&ProjectConfigRow {
                    id: Uuid::new_v4(),
                    project_id,
                    name,
                    content_hash,
                    reported_at: now,
                })
                .await?;
            counts.project_configs += 1;
        }

        for entry in &request.hosts {
            let host_name = ensure_bounded_string(&entry.host_name, "hosts.host_name", 253)?;
            self.store
                .upsert_host(&HostRow {
                    id: Uuid::new_v4(),
                    project_id,
                    host_name,
                    summary: sanitize_desired_host_summary(&entry.summary),
                    reported_at: now,
                })
                .await?;
            counts.hosts += 1;
        }

        for entry in &request.gateways {
            let host_name = ensure_bounded_string(&entry.host_name, "gateways.host_name", 253)?;
            let gateway_id =
                ensure_bounded_string(&entry.gateway_id, "gateways.gateway_id", 128)?;
            self.store
                .upsert_gateway(&GatewayRow {
                    id: Uuid::new_v4(),
                    project_id,
                    host_name,
                    gateway_id,
                    summary: sanitize_desired_gateway_summary(&entry.summary),
                    reported_at: now,
                })
                .await?;
            counts.gateways += 1;
        }

        for entry in &request.secret_wiring {
            let host_name =
                ensure_bounded_string(&entry.host_name, "secret_wiring.host_name", 253)?;
            let secret_name =
                ensure_bounded_string(&entry.secret_name, "secret_wiring.secret_name", 256)?;
            let target_path = validate_repo_path(&entry.target_path, "secret_wiring.target_path")?;
            self.store
                .upsert_secret_wiring(&SecretWiringRow {
                    id: Uuid::new_v4(),
                    project_id,
                    host_name,
                    secret_name,
                    target_path,
                    reported_at: now,
                })
                .await?;
            counts.secret_wiring += 1;
        }

        tracing::debug!(
            project_id = %project_id,
            runner_id = %identity.runner.id,
            hosts = counts.hosts,
            gateways = counts.gateways,
            "metadata sync applied"
        );
        Ok(counts)
    }

    /// Append a sanitized batch of runner-reported run events.
    pub async fn append_run_events(
        &self,
        identity: &RunnerIdentity,
        run_id: Uuid,
        events: &[RunEventInput],
    ) -> Result<u64, EngineError> {
        let project_id = identity.runner.project_id;
        self.store
            .get_run(run_id)
            .await?
            .filter(|r| r.project_id == project_id)
            .ok_or_else(|| EngineError::NotFound("run not found".to_owned()))?;

        let sanitized =
            sanitize_runner_run_events_for_storage(project_id, run_id, events, self.now())?;
        self.store.insert_run_events(&sanitized).await?;
        Ok(sanitized.len() as u64)
    }
}

fn check_shape_caps(request: &MetadataSyncRequest) -> Result<(), EngineError> {
    if request.project_configs.len() > MAX_CONFIGS {
        return Err(EngineError::Conflict(format!(
            "at most {MAX_CONFIGS} project configs per sync"
        )));
    }
    if request.hosts.len() > MAX_HOSTS {
        return Err(EngineError::Conflict(format!(
            "at most {MAX_HOSTS} hosts per sync"
        )));
    }
    if request.gateways.len() > MAX_GATEWAYS {
        return Err(EngineError::Conflict(format!(
            "at most {MAX_GATEWAYS} gateways per sync"
        )));
    }
    if request.secret_wiring.len() > MAX_WIRING_TOTAL {
        return Err(EngineError::Conflict(format!(
            "at most {MAX_WIRING_TOTAL} secret wiring rows per sync"
        )));
    }
    let mut per_host: HashMap<&str, usize> = HashMap::new();
    for entry in &request.secret_wiring {
        let count = per_host.entry(entry.host_name.as_str()).or_insert(0);
        *count += 1;
        if *count > MAX_WIRING_PER_HOST {
            return Err(EngineError::Conflict(format!(
                "at most {MAX_WIRING_PER_HOST} secret wiring rows per host"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wiring_per_host_cap_is_enforced() {
        let entry = |host: &str| SecretWiringSyncEntry {
            host_name: host.to_owned(),
            secret_name: "db-password".to_owned(),
            target_path: "secrets/db".to_owned(),
        };
        let over = MetadataSyncRequest {
            secret_wiring: (0..501).map(|_| entry("web-1")).collect(),
            ..MetadataSyncRequest::default()
        };
        assert!(check_shape_caps(&over).is_err());

        let split = MetadataSyncRequest {
            secret_wiring: (0..500)
                .map(|_| entry("web-1"))
                .chain((0..500).map(|_| entry("web-2")))
                .collect(),
            ..MetadataSyncRequest::default()
        };
        assert!(check_shape_caps(&split).is_ok());
    }
}
