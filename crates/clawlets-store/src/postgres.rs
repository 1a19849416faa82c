//! PostgreSQL store backend (feature `postgres-backend`).
//!
//! Every conditional transition compiles to a single `UPDATE ... WHERE`
//! statement so lease invariants hold across processes without explicit
//! locking. Nested document fields (workspace refs, capability records,
//! summaries, event metadata) are stored as JSONB; status enums as text.
//!
//! The schema is created by [`PgStore::migrate`] — idempotent
//! `CREATE TABLE IF NOT EXISTS` statements covering the indexes the engine
//! relies on (`jobs` by project/status/target/created_at, result tables by
//! job and expiry, log-ish tables by project/ts).

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    AuditLogEntry, CommandResult, CommandResultBlob, DeletionJob, DeletionToken, GatewayRow,
    HostRow, Job, JobStatus, Project, ProjectConfigRow, ProjectCredential, ProjectMember,
    ProjectPolicy, ProjectStatus, ProviderRow, RateLimitRow, RetentionSweep, Run, RunEvent,
    RunStatus, Runner, RunnerCapabilities, RunnerStatus, RunnerToken, SecretWiringRow, SetupDraft,
};
use crate::{Store, StoreError};

/// PostgreSQL [`Store`] implementation over a connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS projects (
    id UUID PRIMARY KEY,
    owner_id TEXT NOT NULL,
    name TEXT NOT NULL,
    execution_mode TEXT NOT NULL,
    workspace JSONB NOT NULL,
    local_path TEXT,
    runner_repo_path TEXT,
    status TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    UNIQUE (owner_id, name)
);
CREATE TABLE IF NOT EXISTS project_members (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL,
    user_id TEXT NOT NULL,
    role TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    UNIQUE (project_id, user_id)
);
CREATE TABLE IF NOT EXISTS runners (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL,
    name TEXT NOT NULL,
    version TEXT,
    last_seen_at TIMESTAMPTZ,
    last_status TEXT NOT NULL,
    capabilities JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    UNIQUE (project_id, name)
);
CREATE TABLE IF NOT EXISTS runner_tokens (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL,
    runner_id UUID NOT NULL,
    token_hash TEXT NOT NULL,
    expires_at TIMESTAMPTZ,
    revoked_at TIMESTAMPTZ,
    last_used_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS runner_tokens_by_hash ON runner_tokens (token_hash);
CREATE TABLE IF NOT EXISTS runs (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL,
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    title TEXT,
    host TEXT,
    initiator TEXT,
    started_at TIMESTAMPTZ,
    finished_at TIMESTAMPTZ,
    error_message TEXT,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS runs_by_project_started ON runs (project_id, started_at);
CREATE TABLE IF NOT EXISTS jobs (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL,
    run_id UUID NOT NULL,
    kind TEXT NOT NULL,
    payload_meta JSONB,
    payload_hash TEXT,
    target_runner_id UUID,
    sealed_input_required BOOLEAN NOT NULL,
    sealed_input_b64 TEXT,
    sealed_input_alg TEXT,
    sealed_input_key_id TEXT,
    sealed_pending_expires_at TIMESTAMPTZ,
    lease_id TEXT,
    leased_by_runner_id UUID,
    lease_expires_at TIMESTAMPTZ,
    attempt BIGINT NOT NULL,
    status TEXT NOT NULL,
    error_message TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    started_at TIMESTAMPTZ,
    finished_at TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS jobs_by_project_status ON jobs (project_id, status, created_at);
CREATE INDEX IF NOT EXISTS jobs_by_project_created ON jobs (project_id, created_at);
CREATE INDEX IF NOT EXISTS jobs_by_project_status_target
    ON jobs (project_id, status, target_runner_id, created_at);
CREATE TABLE IF NOT EXISTS command_results (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL,
    run_id UUID NOT NULL,
    job_id UUID NOT NULL,
    json JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS command_results_by_job ON command_results (job_id);
CREATE INDEX IF NOT EXISTS command_results_by_expiry ON command_results (expires_at);
CREATE TABLE IF NOT EXISTS command_result_blobs (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL,
    run_id UUID NOT NULL,
    job_id UUID NOT NULL,
    storage_id TEXT NOT NULL,
    size BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL,
    consumed_at TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS command_result_blobs_by_job ON command_result_blobs (job_id);
CREATE INDEX IF NOT EXISTS command_result_blobs_by_expiry ON command_result_blobs (expires_at);
CREATE TABLE IF NOT EXISTS run_events (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL,
    run_id UUID NOT NULL,
    ts TIMESTAMPTZ NOT NULL,
    level TEXT NOT NULL,
    message TEXT NOT NULL,
    meta JSONB
);
CREATE INDEX IF NOT EXISTS run_events_by_project_ts ON run_events (project_id, ts);
CREATE INDEX IF NOT EXISTS run_events_by_run_ts ON run_events (run_id, ts);
CREATE TABLE IF NOT EXISTS audit_logs (
    id UUID PRIMARY KEY,
    ts TIMESTAMPTZ NOT NULL,
    user_id TEXT NOT NULL,
    project_id UUID,
    action TEXT NOT NULL,
    target JSONB,
    data JSONB
);
CREATE INDEX IF NOT EXISTS audit_logs_by_project_ts ON audit_logs (project_id, ts);
CREATE TABLE IF NOT EXISTS project_policies (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL UNIQUE,
    retention_days BIGINT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS retention_sweeps (
    key TEXT PRIMARY KEY,
    cursor UUID,
    lease_id TEXT,
    lease_expires_at TIMESTAMPTZ
);
CREATE TABLE IF NOT EXISTS project_deletion_tokens (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL,
    token_hash TEXT NOT NULL,
    expires_at TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS project_deletion_jobs (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL,
    requested_by TEXT NOT NULL,
    status TEXT NOT NULL,
    stage TEXT NOT NULL,
    processed BIGINT NOT NULL,
    lease_id TEXT,
    lease_expires_at TIMESTAMPTZ,
    last_error TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    completed_at TIMESTAMPTZ
);
CREATE INDEX IF NOT EXISTS deletion_jobs_by_project_status
    ON project_deletion_jobs (project_id, status);
CREATE TABLE IF NOT EXISTS rate_limits (
    key TEXT PRIMARY KEY,
    window_start TIMESTAMPTZ NOT NULL,
    count BIGINT NOT NULL
);
CREATE TABLE IF NOT EXISTS hosts (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL,
    host_name TEXT NOT NULL,
    summary JSONB NOT NULL,
    reported_at TIMESTAMPTZ NOT NULL,
    UNIQUE (project_id, host_name)
);
CREATE TABLE IF NOT EXISTS gateways (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL,
    host_name TEXT NOT NULL,
    gateway_id TEXT NOT NULL,
    summary JSONB NOT NULL,
    reported_at TIMESTAMPTZ NOT NULL,
    UNIQUE (project_id, host_name, gateway_id)
);
CREATE TABLE IF NOT EXISTS project_configs (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL,
    name TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    reported_at TIMESTAMPTZ NOT NULL,
    UNIQUE (project_id, name)
);
CREATE TABLE IF NOT EXISTS secret_wiring (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL,
    host_name TEXT NOT NULL,
    secret_name TEXT NOT NULL,
    target_path TEXT NOT NULL,
    reported_at TIMESTAMPTZ NOT NULL,
    UNIQUE (project_id, host_name, secret_name)
);
CREATE TABLE IF NOT EXISTS providers (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    config JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS project_credentials (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL,
    name TEXT NOT NULL,
    sealed_value_b64 TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE TABLE IF NOT EXISTS setup_drafts (
    id UUID PRIMARY KEY,
    project_id UUID NOT NULL,
    host_name TEXT NOT NULL,
    deploy_creds JSONB,
    bootstrap_secrets JSONB,
    version BIGINT NOT NULL,
    status TEXT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    UNIQUE (project_id, host_name)
);
";

impl PgStore {
    /// Wrap an existing pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create all tables and indexes if they do not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

// ── Mapping helpers ──────────────────────────────────────────────────

/// Serialize a unit enum to its serde string form (e.g. `sealed_pending`).
fn enum_str<T: Serialize>(value: &T) -> Result<String, StoreError> {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => Ok(s),
        other => Err(StoreError::Write(format!("non-string enum encoding: {other:?}"))),
    }
}

/// Parse a unit enum from its serde string form.
fn parse_enum<T: DeserializeOwned>(s: &str) -> Result<T, StoreError> {
    serde_json::from_value(serde_json::Value::String(s.to_owned()))
        .map_err(|e| StoreError::Read(format!("unknown enum value '{s}': {e}")))
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Write(format!("encode failed: {e}")))
}

fn from_json<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Read(format!("decode failed: {e}")))
}

fn opt_json<T: DeserializeOwned>(
    value: Option<serde_json::Value>,
) -> Result<Option<T>, StoreError> {
    value.map(from_json).transpose()
}

fn map_project(row: &PgRow) -> Result<Project, StoreError> {
    Ok(Project {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        name: row.try_get("name")?,
        execution_mode: parse_enum(row.try_get::<String, _>("execution_mode")?.as_str())?,
        workspace: from_json(row.try_get("workspace")?)?,
        local_path: row.try_get("local_path")?,
        runner_repo_path: row.try_get("runner_repo_path")?,
        status: parse_enum(row.try_get::<String, _>("status")?.as_str())?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_member(row: &PgRow) -> Result<ProjectMember, StoreError> {
    Ok(ProjectMember {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        user_id: row.try_get("user_id")?,
        role: parse_enum(row.try_get::<String, _>("role")?.as_str())?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_runner(row: &PgRow) -> Result<Runner, StoreError> {
    Ok(Runner {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        name: row.try_get("name")?,
        version: row.try_get("version")?,
        last_seen_at: row.try_get("last_seen_at")?,
        last_status: parse_enum(row.try_get::<String, _>("last_status")?.as_str())?,
        capabilities: from_json(row.try_get("capabilities")?)?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_runner_token(row: &PgRow) -> Result<RunnerToken, StoreError> {
    Ok(RunnerToken {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        runner_id: row.try_get("runner_id")?,
        token_hash: row.try_get("token_hash")?,
        expires_at: row.try_get("expires_at")?,
        revoked_at: row.try_get("revoked_at")?,
        last_used_at: row.try_get("last_used_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_run(row: &PgRow) -> Result<Run, StoreError> {
    Ok(Run {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        kind: row.try_get("kind")?,
        status: parse_enum(row.try_get::<String, _>("status")?.as_str())?,
        title: row.try_get("title")?,
        host: row.try_get("host")?,
        initiator: row.try_get("initiator")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_job(row: &PgRow) -> Result<Job, StoreError> {
    Ok(Job {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        run_id: row.try_get("run_id")?,
        kind: row.try_get("kind")?,
        payload_meta: row.try_get("payload_meta")?,
        payload_hash: row.try_get("payload_hash")?,
        target_runner_id: row.try_get("target_runner_id")?,
        sealed_input_required: row.try_get("sealed_input_required")?,
        sealed_input_b64: row.try_get("sealed_input_b64")?,
        sealed_input_alg: row.try_get("sealed_input_alg")?,
        sealed_input_key_id: row.try_get("sealed_input_key_id")?,
        sealed_pending_expires_at: row.try_get("sealed_pending_expires_at")?,
        lease_id: row.try_get("lease_id")?,
        leased_by_runner_id: row.try_get("leased_by_runner_id")?,
        lease_expires_at: row.try_get("lease_expires_at")?,
        attempt: row.try_get("attempt")?,
        status: parse_enum(row.try_get::<String, _>("status")?.as_str())?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

fn map_command_result(row: &PgRow) -> Result<CommandResult, StoreError> {
    Ok(CommandResult {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        run_id: row.try_get("run_id")?,
        job_id: row.try_get("job_id")?,
        json: row.try_get("json")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn map_command_result_blob(row: &PgRow) -> Result<CommandResultBlob, StoreError> {
    Ok(CommandResultBlob {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        run_id: row.try_get("run_id")?,
        job_id: row.try_get("job_id")?,
        storage_id: row.try_get("storage_id")?,
        size: row.try_get("size")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        consumed_at: row.try_get("consumed_at")?,
    })
}

fn map_run_event(row: &PgRow) -> Result<RunEvent, StoreError> {
    Ok(RunEvent {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        run_id: row.try_get("run_id")?,
        ts: row.try_get("ts")?,
        level: parse_enum(row.try_get::<String, _>("level")?.as_str())?,
        message: row.try_get("message")?,
        meta: opt_json(row.try_get("meta")?)?,
    })
}

fn map_audit(row: &PgRow) -> Result<AuditLogEntry, StoreError> {
    Ok(AuditLogEntry {
        id: row.try_get("id")?,
        ts: row.try_get("ts")?,
        user_id: row.try_get("user_id")?,
        project_id: row.try_get("project_id")?,
        action: row.try_get("action")?,
        target: row.try_get("target")?,
        data: row.try_get("data")?,
    })
}

fn map_policy(row: &PgRow) -> Result<ProjectPolicy, StoreError> {
    Ok(ProjectPolicy {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        retention_days: row.try_get("retention_days")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_deletion_job(row: &PgRow) -> Result<DeletionJob, StoreError> {
    Ok(DeletionJob {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        requested_by: row.try_get("requested_by")?,
        status: parse_enum(row.try_get::<String, _>("status")?.as_str())?,
        stage: row.try_get("stage")?,
        processed: row.try_get("processed")?,
        lease_id: row.try_get("lease_id")?,
        lease_expires_at: row.try_get("lease_expires_at")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn map_deletion_token(row: &PgRow) -> Result<DeletionToken, StoreError> {
    Ok(DeletionToken {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        token_hash: row.try_get("token_hash")?,
        expires_at: row.try_get("expires_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn map_host(row: &PgRow) -> Result<HostRow, StoreError> {
    Ok(HostRow {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        host_name: row.try_get("host_name")?,
        summary: from_json(row.try_get("summary")?)?,
        reported_at: row.try_get("reported_at")?,
    })
}

fn map_gateway(row: &PgRow) -> Result<GatewayRow, StoreError> {
    Ok(GatewayRow {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        host_name: row.try_get("host_name")?,
        gateway_id: row.try_get("gateway_id")?,
        summary: from_json(row.try_get("summary")?)?,
        reported_at: row.try_get("reported_at")?,
    })
}

fn map_project_config(row: &PgRow) -> Result<ProjectConfigRow, StoreError> {
    Ok(ProjectConfigRow {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        name: row.try_get("name")?,
        content_hash: row.try_get("content_hash")?,
        reported_at: row.try_get("reported_at")?,
    })
}

fn map_secret_wiring(row: &PgRow) -> Result<SecretWiringRow, StoreError> {
    Ok(SecretWiringRow {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        host_name: row.try_get("host_name")?,
        secret_name: row.try_get("secret_name")?,
        target_path: row.try_get("target_path")?,
        reported_at: row.try_get("reported_at")?,
    })
}

fn map_setup_draft(row: &PgRow) -> Result<SetupDraft, StoreError> {
    Ok(SetupDraft {
        id: row.try_get("id")?,
        project_id: row.try_get("project_id")?,
        host_name: row.try_get("host_name")?,
        deploy_creds: opt_json(row.try_get("deploy_creds")?)?,
        bootstrap_secrets: opt_json(row.try_get("bootstrap_secrets")?)?,
        version: row.try_get("version")?,
        status: parse_enum(row.try_get::<String, _>("status")?.as_str())?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// `DELETE ... LIMIT` via an id subquery; returns rows deleted.
async fn delete_limited(
    pool: &PgPool,
    table: &str,
    filter: &str,
    project_id: Uuid,
    limit: u32,
) -> Result<u64, StoreError> {
    let sql = format!(
        "DELETE FROM {table} WHERE id IN \
         (SELECT id FROM {table} WHERE {filter} LIMIT $2)"
    );
    let result = sqlx::query(&sql)
        .bind(project_id)
        .bind(i64::from(limit))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[async_trait::async_trait]
impl Store for PgStore {
    // ── Projects ─────────────────────────────────────────────────────

    async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO projects
              (id, owner_id, name, execution_mode, workspace, local_path,
               runner_repo_path, status, created_at, updated_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(project.id)
        .bind(&project.owner_id)
        .bind(&project.name)
        .bind(enum_str(&project.execution_mode)?)
        .bind(to_json(&project.workspace)?)
        .bind(&project.local_path)
        .bind(&project.runner_repo_path)
        .bind(enum_str(&project.status)?)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, StoreError> {
        sqlx::query("SELECT * FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| map_project(&row))
            .transpose()
    }

    async fn set_project_status(
        &self,
        id: Uuid,
        status: ProjectStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE projects SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(enum_str(&status)?)
            .bind(updated_at)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_project(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Members ──────────────────────────────────────────────────────

    async fn insert_member(&self, member: &ProjectMember) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO project_members (id, project_id, user_id, role, created_at)
              VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(member.id)
        .bind(member.project_id)
        .bind(&member.user_id)
        .bind(enum_str(&member.role)?)
        .bind(member.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_member(
        &self,
        project_id: Uuid,
        user_id: &str,
    ) -> Result<Option<ProjectMember>, StoreError> {
        sqlx::query("SELECT * FROM project_members WHERE project_id = $1 AND user_id = $2")
            .bind(project_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| map_member(&row))
            .transpose()
    }

    async fn purge_members(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        delete_limited(&self.pool, "project_members", "project_id = $1", project_id, limit).await
    }

    // ── Runners ──────────────────────────────────────────────────────

    async fn insert_runner(&self, runner: &Runner) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO runners
              (id, project_id, name, version, last_seen_at, last_status, capabilities, created_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(runner.id)
        .bind(runner.project_id)
        .bind(&runner.name)
        .bind(&runner.version)
        .bind(runner.last_seen_at)
        .bind(enum_str(&runner.last_status)?)
        .bind(to_json(&runner.capabilities)?)
        .bind(runner.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_runner(&self, id: Uuid) -> Result<Option<Runner>, StoreError> {
        sqlx::query("SELECT * FROM runners WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| map_runner(&row))
            .transpose()
    }

    async fn get_runner_by_name(
        &self,
        project_id: Uuid,
        name: &str,
    ) -> Result<Option<Runner>, StoreError> {
        sqlx::query("SELECT * FROM runners WHERE project_id = $1 AND name = $2")
            .bind(project_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| map_runner(&row))
            .transpose()
    }

    async fn update_runner_heartbeat(
        &self,
        id: Uuid,
        last_seen_at: DateTime<Utc>,
        version: Option<&str>,
        capabilities: &RunnerCapabilities,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"UPDATE runners SET
                last_seen_at = $2,
                last_status = 'online',
                version = COALESCE($3, version),
                capabilities = $4
              WHERE id = $1",
        )
        .bind(id)
        .bind(last_seen_at)
        .bind(version)
        .bind(to_json(capabilities)?)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_runner_status(&self, id: Uuid, status: RunnerStatus) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE runners SET last_status = $2 WHERE id = $1")
            .bind(id)
            .bind(enum_str(&status)?)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_runners(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        delete_limited(&self.pool, "runners", "project_id = $1", project_id, limit).await
    }

    // ── Runner tokens ────────────────────────────────────────────────

    async fn insert_runner_token(&self, token: &RunnerToken) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO runner_tokens
              (id, project_id, runner_id, token_hash, expires_at, revoked_at,
               last_used_at, created_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(token.id)
        .bind(token.project_id)
        .bind(token.runner_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(token.revoked_at)
        .bind(token.last_used_at)
        .bind(token.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_runner_token(&self, id: Uuid) -> Result<Option<RunnerToken>, StoreError> {
        sqlx::query("SELECT * FROM runner_tokens WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| map_runner_token(&row))
            .transpose()
    }

    async fn get_runner_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RunnerToken>, StoreError> {
        sqlx::query("SELECT * FROM runner_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| map_runner_token(&row))
            .transpose()
    }

    async fn touch_runner_token(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE runner_tokens SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn revoke_runner_token(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE runner_tokens SET revoked_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_runner_tokens(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        delete_limited(&self.pool, "runner_tokens", "project_id = $1", project_id, limit).await
    }

    // ── Runs ─────────────────────────────────────────────────────────

    async fn insert_run(&self, run: &Run) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO runs
              (id, project_id, kind, status, title, host, initiator, started_at,
               finished_at, error_message, created_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(run.id)
        .bind(run.project_id)
        .bind(&run.kind)
        .bind(enum_str(&run.status)?)
        .bind(&run.title)
        .bind(&run.host)
        .bind(&run.initiator)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(&run.error_message)
        .bind(run.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Option<Run>, StoreError> {
        sqlx::query("SELECT * FROM runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| map_run(&row))
            .transpose()
    }

    async fn reset_run_to_queued(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"UPDATE runs SET status = 'queued', finished_at = NULL, error_message = NULL
              WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_run_running(
        &self,
        id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE runs SET status = 'running', started_at = $2 WHERE id = $1")
                .bind(id)
                .bind(started_at)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_run_terminal(
        &self,
        id: Uuid,
        status: RunStatus,
        finished_at: DateTime<Utc>,
        error_message: Option<&str>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE runs SET status = $2, finished_at = $3, error_message = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(enum_str(&status)?)
        .bind(finished_at)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_terminal_runs_started_before(
        &self,
        project_id: Uuid,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Run>, StoreError> {
        sqlx::query(
            r"SELECT * FROM runs
              WHERE project_id = $1
                AND status IN ('succeeded', 'failed', 'canceled')
                AND started_at < $2
              ORDER BY started_at, id
              LIMIT $3",
        )
        .bind(project_id)
        .bind(cutoff)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(map_run)
        .collect()
    }

    async fn delete_run(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM runs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_runs(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        delete_limited(&self.pool, "runs", "project_id = $1", project_id, limit).await
    }

    // ── Jobs ─────────────────────────────────────────────────────────

    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO jobs
              (id, project_id, run_id, kind, payload_meta, payload_hash, target_runner_id,
               sealed_input_required, sealed_input_b64, sealed_input_alg, sealed_input_key_id,
               sealed_pending_expires_at, lease_id, leased_by_runner_id, lease_expires_at,
               attempt, status, error_message, created_at, started_at, finished_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                      $16, $17, $18, $19, $20, $21)",
        )
        .bind(job.id)
        .bind(job.project_id)
        .bind(job.run_id)
        .bind(&job.kind)
        .bind(&job.payload_meta)
        .bind(&job.payload_hash)
        .bind(job.target_runner_id)
        .bind(job.sealed_input_required)
        .bind(&job.sealed_input_b64)
        .bind(&job.sealed_input_alg)
        .bind(&job.sealed_input_key_id)
        .bind(job.sealed_pending_expires_at)
        .bind(&job.lease_id)
        .bind(job.leased_by_runner_id)
        .bind(job.lease_expires_at)
        .bind(job.attempt)
        .bind(enum_str(&job.status)?)
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| map_job(&row))
            .transpose()
    }

    async fn list_jobs_by_status(
        &self,
        project_id: Uuid,
        status: JobStatus,
        limit: u32,
    ) -> Result<Vec<Job>, StoreError> {
        sqlx::query(
            r"SELECT * FROM jobs
              WHERE project_id = $1 AND status = $2
              ORDER BY created_at, id
              LIMIT $3",
        )
        .bind(project_id)
        .bind(enum_str(&status)?)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(map_job)
        .collect()
    }

    async fn list_queued_jobs(
        &self,
        project_id: Uuid,
        target: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<Job>, StoreError> {
        let rows = match target {
            Some(runner_id) => {
                sqlx::query(
                    r"SELECT * FROM jobs
                      WHERE project_id = $1 AND status = 'queued' AND target_runner_id = $2
                      ORDER BY created_at, id
                      LIMIT $3",
                )
                .bind(project_id)
                .bind(runner_id)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r"SELECT * FROM jobs
                      WHERE project_id = $1 AND status = 'queued' AND target_runner_id IS NULL
                      ORDER BY created_at, id
                      LIMIT $2",
                )
                .bind(project_id)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(map_job).collect()
    }

    async fn lease_queued_job(
        &self,
        id: Uuid,
        runner_id: Uuid,
        lease_id: &str,
        lease_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        sqlx::query(
            r"UPDATE jobs SET
                status = 'leased',
                lease_id = $3,
                leased_by_runner_id = $2,
                lease_expires_at = $4,
                attempt = attempt + 1,
                started_at = COALESCE(started_at, $5)
              WHERE id = $1 AND status = 'queued'
              RETURNING *",
        )
        .bind(id)
        .bind(runner_id)
        .bind(lease_id)
        .bind(lease_expires_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| map_job(&row))
        .transpose()
    }

    async fn extend_job_lease(
        &self,
        id: Uuid,
        lease_id: &str,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        sqlx::query(
            r"UPDATE jobs SET status = 'running', lease_expires_at = $3
              WHERE id = $1 AND lease_id = $2
                AND status IN ('leased', 'running')
                AND lease_expires_at IS NOT NULL
              RETURNING *",
        )
        .bind(id)
        .bind(lease_id)
        .bind(lease_expires_at)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| map_job(&row))
        .transpose()
    }

    async fn complete_leased_job(
        &self,
        id: Uuid,
        lease_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        if !status.is_terminal() {
            return Ok(None);
        }
        sqlx::query(
            r"UPDATE jobs SET
                status = $3,
                error_message = $4,
                finished_at = $5,
                payload_meta = NULL,
                sealed_input_b64 = NULL,
                sealed_pending_expires_at = NULL,
                lease_id = NULL,
                leased_by_runner_id = NULL,
                lease_expires_at = NULL
              WHERE id = $1 AND lease_id = $2
                AND status IN ('leased', 'running')
                AND lease_expires_at IS NOT NULL
              RETURNING *",
        )
        .bind(id)
        .bind(lease_id)
        .bind(enum_str(&status)?)
        .bind(error_message)
        .bind(finished_at)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| map_job(&row))
        .transpose()
    }

    async fn requeue_leased_job(&self, id: Uuid, lease_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"UPDATE jobs SET
                status = 'queued',
                lease_id = NULL,
                leased_by_runner_id = NULL,
                lease_expires_at = NULL
              WHERE id = $1 AND lease_id = $2 AND status IN ('leased', 'running')",
        )
        .bind(id)
        .bind(lease_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fail_job(
        &self,
        id: Uuid,
        error_message: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        sqlx::query(
            r"UPDATE jobs SET
                status = 'failed',
                error_message = $2,
                finished_at = $3,
                payload_meta = NULL,
                sealed_input_b64 = NULL,
                sealed_pending_expires_at = NULL,
                lease_id = NULL,
                leased_by_runner_id = NULL,
                lease_expires_at = NULL
              WHERE id = $1 AND status NOT IN ('succeeded', 'failed', 'canceled')
              RETURNING *",
        )
        .bind(id)
        .bind(error_message)
        .bind(finished_at)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| map_job(&row))
        .transpose()
    }

    async fn cancel_job(
        &self,
        id: Uuid,
        finished_at: DateTime<Utc>,
    ) -> Result<Option<Job>, StoreError> {
        sqlx::query(
            r"UPDATE jobs SET
                status = 'canceled',
                error_message = NULL,
                finished_at = $2,
                payload_meta = NULL,
                sealed_input_b64 = NULL,
                sealed_pending_expires_at = NULL,
                lease_id = NULL,
                leased_by_runner_id = NULL,
                lease_expires_at = NULL
              WHERE id = $1 AND status NOT IN ('succeeded', 'failed', 'canceled')
              RETURNING *",
        )
        .bind(id)
        .bind(finished_at)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| map_job(&row))
        .transpose()
    }

    async fn finalize_sealed_job(
        &self,
        id: Uuid,
        sealed_input_b64: &str,
    ) -> Result<Option<Job>, StoreError> {
        sqlx::query(
            r"UPDATE jobs SET
                status = 'queued',
                sealed_input_b64 = $2,
                sealed_pending_expires_at = NULL
              WHERE id = $1 AND status = 'sealed_pending'
              RETURNING *",
        )
        .bind(id)
        .bind(sealed_input_b64)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| map_job(&row))
        .transpose()
    }

    async fn purge_jobs(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        delete_limited(&self.pool, "jobs", "project_id = $1", project_id, limit).await
    }

    // ── Command results ──────────────────────────────────────────────

    async fn insert_command_result(&self, row: &CommandResult) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO command_results
              (id, project_id, run_id, job_id, json, created_at, expires_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(row.id)
        .bind(row.project_id)
        .bind(row.run_id)
        .bind(row.job_id)
        .bind(&row.json)
        .bind(row.created_at)
        .bind(row.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_command_result_blob(
        &self,
        row: &CommandResultBlob,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO command_result_blobs
              (id, project_id, run_id, job_id, storage_id, size, created_at, expires_at,
               consumed_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(row.id)
        .bind(row.project_id)
        .bind(row.run_id)
        .bind(row.job_id)
        .bind(&row.storage_id)
        .bind(row.size)
        .bind(row.created_at)
        .bind(row.expires_at)
        .bind(row.consumed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_command_results(&self, job_id: Uuid) -> Result<Vec<CommandResult>, StoreError> {
        sqlx::query("SELECT * FROM command_results WHERE job_id = $1 ORDER BY created_at, id")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(map_command_result)
            .collect()
    }

    async fn list_command_result_blobs(
        &self,
        job_id: Uuid,
    ) -> Result<Vec<CommandResultBlob>, StoreError> {
        sqlx::query("SELECT * FROM command_result_blobs WHERE job_id = $1 ORDER BY created_at, id")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(map_command_result_blob)
            .collect()
    }

    async fn delete_command_result(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM command_results WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_command_result_blob(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM command_result_blobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_blob_consumed(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE command_result_blobs SET consumed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired_command_results(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"DELETE FROM command_results WHERE id IN
              (SELECT id FROM command_results WHERE expires_at <= $1 LIMIT $2)",
        )
        .bind(now)
        .bind(i64::from(limit))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_expired_command_result_blobs(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r"DELETE FROM command_result_blobs WHERE id IN
              (SELECT id FROM command_result_blobs WHERE expires_at <= $1 LIMIT $2)
              RETURNING storage_id",
        )
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get("storage_id").map_err(StoreError::from))
            .collect()
    }

    async fn purge_command_results(
        &self,
        project_id: Uuid,
        limit: u32,
    ) -> Result<u64, StoreError> {
        delete_limited(&self.pool, "command_results", "project_id = $1", project_id, limit).await
    }

    async fn purge_command_result_blobs(
        &self,
        project_id: Uuid,
        limit: u32,
    ) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r"DELETE FROM command_result_blobs WHERE id IN
              (SELECT id FROM command_result_blobs WHERE project_id = $1 LIMIT $2)
              RETURNING storage_id",
        )
        .bind(project_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get("storage_id").map_err(StoreError::from))
            .collect()
    }

    // ── Run events ───────────────────────────────────────────────────

    async fn insert_run_events(&self, events: &[RunEvent]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for event in events {
            sqlx::query(
                r"INSERT INTO run_events (id, project_id, run_id, ts, level, message, meta)
                  VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(event.id)
            .bind(event.project_id)
            .bind(event.run_id)
            .bind(event.ts)
            .bind(enum_str(&event.level)?)
            .bind(&event.message)
            .bind(event.meta.as_ref().map(to_json).transpose()?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_run_events(
        &self,
        run_id: Uuid,
        limit: u32,
    ) -> Result<Vec<RunEvent>, StoreError> {
        sqlx::query("SELECT * FROM run_events WHERE run_id = $1 ORDER BY ts, id LIMIT $2")
            .bind(run_id)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(map_run_event)
            .collect()
    }

    async fn delete_run_events_before(
        &self,
        project_id: Uuid,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"DELETE FROM run_events WHERE id IN
              (SELECT id FROM run_events WHERE project_id = $1 AND ts < $2 LIMIT $3)",
        )
        .bind(project_id)
        .bind(cutoff)
        .bind(i64::from(limit))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_run_events_for_run(
        &self,
        run_id: Uuid,
        limit: u32,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"DELETE FROM run_events WHERE id IN
              (SELECT id FROM run_events WHERE run_id = $1 LIMIT $2)",
        )
        .bind(run_id)
        .bind(i64::from(limit))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_run_events(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        delete_limited(&self.pool, "run_events", "project_id = $1", project_id, limit).await
    }

    // ── Audit log ────────────────────────────────────────────────────

    async fn insert_audit(&self, entry: &AuditLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO audit_logs (id, ts, user_id, project_id, action, target, data)
              VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id)
        .bind(entry.ts)
        .bind(&entry.user_id)
        .bind(entry.project_id)
        .bind(&entry.action)
        .bind(&entry.target)
        .bind(&entry.data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_audit(
        &self,
        project_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<AuditLogEntry>, StoreError> {
        sqlx::query(
            r"SELECT * FROM audit_logs WHERE project_id = $1
              ORDER BY ts DESC, id
              LIMIT $2 OFFSET $3",
        )
        .bind(project_id)
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(map_audit)
        .collect()
    }

    async fn delete_audit_before(
        &self,
        project_id: Uuid,
        cutoff: DateTime<Utc>,
        limit: u32,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r"DELETE FROM audit_logs WHERE id IN
              (SELECT id FROM audit_logs WHERE project_id = $1 AND ts < $2 LIMIT $3)",
        )
        .bind(project_id)
        .bind(cutoff)
        .bind(i64::from(limit))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_audit_logs(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        delete_limited(&self.pool, "audit_logs", "project_id = $1", project_id, limit).await
    }

    // ── Retention policies & sweep cursor ────────────────────────────

    async fn upsert_policy(&self, policy: &ProjectPolicy) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO project_policies (id, project_id, retention_days, updated_at)
              VALUES ($1, $2, $3, $4)
              ON CONFLICT (project_id) DO UPDATE SET
                retention_days = EXCLUDED.retention_days,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(policy.id)
        .bind(policy.project_id)
        .bind(policy.retention_days)
        .bind(policy.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_policy(&self, project_id: Uuid) -> Result<Option<ProjectPolicy>, StoreError> {
        sqlx::query("SELECT * FROM project_policies WHERE project_id = $1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| map_policy(&row))
            .transpose()
    }

    async fn list_policies_after(
        &self,
        cursor: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<ProjectPolicy>, StoreError> {
        let rows = match cursor {
            Some(after) => {
                sqlx::query(
                    r"SELECT * FROM project_policies WHERE project_id > $1
                      ORDER BY project_id LIMIT $2",
                )
                .bind(after)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM project_policies ORDER BY project_id LIMIT $1")
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(map_policy).collect()
    }

    async fn purge_policies(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        delete_limited(&self.pool, "project_policies", "project_id = $1", project_id, limit).await
    }

    async fn get_retention_sweep(&self, key: &str) -> Result<Option<RetentionSweep>, StoreError> {
        let row = sqlx::query("SELECT * FROM retention_sweeps WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(RetentionSweep {
                key: row.try_get("key")?,
                cursor: row.try_get("cursor")?,
                lease_id: row.try_get("lease_id")?,
                lease_expires_at: row.try_get("lease_expires_at")?,
            })
        })
        .transpose()
    }

    async fn put_retention_sweep(&self, sweep: &RetentionSweep) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO retention_sweeps (key, cursor, lease_id, lease_expires_at)
              VALUES ($1, $2, $3, $4)
              ON CONFLICT (key) DO UPDATE SET
                cursor = EXCLUDED.cursor,
                lease_id = EXCLUDED.lease_id,
                lease_expires_at = EXCLUDED.lease_expires_at",
        )
        .bind(&sweep.key)
        .bind(sweep.cursor)
        .bind(&sweep.lease_id)
        .bind(sweep.lease_expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── Erasure ──────────────────────────────────────────────────────

    async fn insert_deletion_token(&self, token: &DeletionToken) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO project_deletion_tokens
              (id, project_id, token_hash, expires_at, created_at)
              VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(token.id)
        .bind(token.project_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(token.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_deletion_tokens(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<DeletionToken>, StoreError> {
        sqlx::query("SELECT * FROM project_deletion_tokens WHERE project_id = $1")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(map_deletion_token)
            .collect()
    }

    async fn delete_deletion_tokens(&self, project_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM project_deletion_tokens WHERE project_id = $1")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn purge_deletion_tokens(
        &self,
        project_id: Uuid,
        limit: u32,
    ) -> Result<u64, StoreError> {
        delete_limited(
            &self.pool,
            "project_deletion_tokens",
            "project_id = $1",
            project_id,
            limit,
        )
        .await
    }

    async fn insert_deletion_job(&self, job: &DeletionJob) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO project_deletion_jobs
              (id, project_id, requested_by, status, stage, processed, lease_id,
               lease_expires_at, last_error, created_at, completed_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(job.id)
        .bind(job.project_id)
        .bind(&job.requested_by)
        .bind(enum_str(&job.status)?)
        .bind(&job.stage)
        .bind(job.processed)
        .bind(&job.lease_id)
        .bind(job.lease_expires_at)
        .bind(&job.last_error)
        .bind(job.created_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_deletion_job(&self, id: Uuid) -> Result<Option<DeletionJob>, StoreError> {
        sqlx::query("SELECT * FROM project_deletion_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| map_deletion_job(&row))
            .transpose()
    }

    async fn get_active_deletion_job(
        &self,
        project_id: Uuid,
    ) -> Result<Option<DeletionJob>, StoreError> {
        sqlx::query(
            r"SELECT * FROM project_deletion_jobs
              WHERE project_id = $1 AND status IN ('pending', 'running')
              LIMIT 1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| map_deletion_job(&row))
        .transpose()
    }

    async fn get_latest_deletion_job(
        &self,
        project_id: Uuid,
    ) -> Result<Option<DeletionJob>, StoreError> {
        sqlx::query(
            r"SELECT * FROM project_deletion_jobs
              WHERE project_id = $1
              ORDER BY created_at DESC, id DESC
              LIMIT 1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| map_deletion_job(&row))
        .transpose()
    }

    async fn update_deletion_job(&self, job: &DeletionJob) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"UPDATE project_deletion_jobs SET
                status = $2, stage = $3, processed = $4, lease_id = $5,
                lease_expires_at = $6, last_error = $7, completed_at = $8
              WHERE id = $1",
        )
        .bind(job.id)
        .bind(enum_str(&job.status)?)
        .bind(&job.stage)
        .bind(job.processed)
        .bind(&job.lease_id)
        .bind(job.lease_expires_at)
        .bind(&job.last_error)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Rate limiting ────────────────────────────────────────────────

    async fn get_rate_limit(&self, key: &str) -> Result<Option<RateLimitRow>, StoreError> {
        let row = sqlx::query("SELECT * FROM rate_limits WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(RateLimitRow {
                key: row.try_get("key")?,
                window_start: row.try_get("window_start")?,
                count: row.try_get("count")?,
            })
        })
        .transpose()
    }

    async fn put_rate_limit(&self, limit_row: &RateLimitRow) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO rate_limits (key, window_start, count)
              VALUES ($1, $2, $3)
              ON CONFLICT (key) DO UPDATE SET
                window_start = EXCLUDED.window_start,
                count = EXCLUDED.count",
        )
        .bind(&limit_row.key)
        .bind(limit_row.window_start)
        .bind(limit_row.count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── Runner-reported metadata ─────────────────────────────────────

    async fn upsert_host(&self, row: &HostRow) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO hosts (id, project_id, host_name, summary, reported_at)
              VALUES ($1, $2, $3, $4, $5)
              ON CONFLICT (project_id, host_name) DO UPDATE SET
                summary = EXCLUDED.summary,
                reported_at = EXCLUDED.reported_at",
        )
        .bind(row.id)
        .bind(row.project_id)
        .bind(&row.host_name)
        .bind(to_json(&row.summary)?)
        .bind(row.reported_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_hosts(&self, project_id: Uuid) -> Result<Vec<HostRow>, StoreError> {
        sqlx::query("SELECT * FROM hosts WHERE project_id = $1 ORDER BY host_name")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(map_host)
            .collect()
    }

    async fn purge_hosts(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        delete_limited(&self.pool, "hosts", "project_id = $1", project_id, limit).await
    }

    async fn upsert_gateway(&self, row: &GatewayRow) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO gateways (id, project_id, host_name, gateway_id, summary, reported_at)
              VALUES ($1, $2, $3, $4, $5, $6)
              ON CONFLICT (project_id, host_name, gateway_id) DO UPDATE SET
                summary = EXCLUDED.summary,
                reported_at = EXCLUDED.reported_at",
        )
        .bind(row.id)
        .bind(row.project_id)
        .bind(&row.host_name)
        .bind(&row.gateway_id)
        .bind(to_json(&row.summary)?)
        .bind(row.reported_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_gateways(&self, project_id: Uuid) -> Result<Vec<GatewayRow>, StoreError> {
        sqlx::query("SELECT * FROM gateways WHERE project_id = $1 ORDER BY host_name, gateway_id")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(map_gateway)
            .collect()
    }

    async fn purge_gateways(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        delete_limited(&self.pool, "gateways", "project_id = $1", project_id, limit).await
    }

    async fn upsert_project_config(&self, row: &ProjectConfigRow) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO project_configs (id, project_id, name, content_hash, reported_at)
              VALUES ($1, $2, $3, $4, $5)
              ON CONFLICT (project_id, name) DO UPDATE SET
                content_hash = EXCLUDED.content_hash,
                reported_at = EXCLUDED.reported_at",
        )
        .bind(row.id)
        .bind(row.project_id)
        .bind(&row.name)
        .bind(&row.content_hash)
        .bind(row.reported_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_project_configs(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<ProjectConfigRow>, StoreError> {
        sqlx::query("SELECT * FROM project_configs WHERE project_id = $1 ORDER BY name")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(map_project_config)
            .collect()
    }

    async fn purge_project_configs(
        &self,
        project_id: Uuid,
        limit: u32,
    ) -> Result<u64, StoreError> {
        delete_limited(&self.pool, "project_configs", "project_id = $1", project_id, limit).await
    }

    async fn upsert_secret_wiring(&self, row: &SecretWiringRow) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO secret_wiring
              (id, project_id, host_name, secret_name, target_path, reported_at)
              VALUES ($1, $2, $3, $4, $5, $6)
              ON CONFLICT (project_id, host_name, secret_name) DO UPDATE SET
                target_path = EXCLUDED.target_path,
                reported_at = EXCLUDED.reported_at",
        )
        .bind(row.id)
        .bind(row.project_id)
        .bind(&row.host_name)
        .bind(&row.secret_name)
        .bind(&row.target_path)
        .bind(row.reported_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_secret_wiring(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<SecretWiringRow>, StoreError> {
        sqlx::query(
            "SELECT * FROM secret_wiring WHERE project_id = $1 ORDER BY host_name, secret_name",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(map_secret_wiring)
        .collect()
    }

    async fn purge_secret_wiring(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        delete_limited(&self.pool, "secret_wiring", "project_id = $1", project_id, limit).await
    }

    // ── Providers & credentials ──────────────────────────────────────

    async fn insert_provider(&self, row: &ProviderRow) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO providers (id, project_id, name, kind, config, created_at)
              VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(row.id)
        .bind(row.project_id)
        .bind(&row.name)
        .bind(&row.kind)
        .bind(&row.config)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_providers(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        delete_limited(&self.pool, "providers", "project_id = $1", project_id, limit).await
    }

    async fn insert_project_credential(&self, row: &ProjectCredential) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO project_credentials (id, project_id, name, sealed_value_b64, created_at)
              VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(row.id)
        .bind(row.project_id)
        .bind(&row.name)
        .bind(&row.sealed_value_b64)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_project_credentials(
        &self,
        project_id: Uuid,
        limit: u32,
    ) -> Result<u64, StoreError> {
        delete_limited(
            &self.pool,
            "project_credentials",
            "project_id = $1",
            project_id,
            limit,
        )
        .await
    }

    // ── Setup drafts ─────────────────────────────────────────────────

    async fn get_setup_draft(
        &self,
        project_id: Uuid,
        host_name: &str,
    ) -> Result<Option<SetupDraft>, StoreError> {
        sqlx::query("SELECT * FROM setup_drafts WHERE project_id = $1 AND host_name = $2")
            .bind(project_id)
            .bind(host_name)
            .fetch_optional(&self.pool)
            .await?
            .map(|row| map_setup_draft(&row))
            .transpose()
    }

    async fn put_setup_draft(&self, draft: &SetupDraft) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO setup_drafts
              (id, project_id, host_name, deploy_creds, bootstrap_secrets, version, status,
               updated_at)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
              ON CONFLICT (project_id, host_name) DO UPDATE SET
                deploy_creds = EXCLUDED.deploy_creds,
                bootstrap_secrets = EXCLUDED.bootstrap_secrets,
                version = EXCLUDED.version,
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(draft.id)
        .bind(draft.project_id)
        .bind(&draft.host_name)
        .bind(draft.deploy_creds.as_ref().map(to_json).transpose()?)
        .bind(draft.bootstrap_secrets.as_ref().map(to_json).transpose()?)
        .bind(draft.version)
        .bind(enum_str(&draft.status)?)
        .bind(draft.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_setup_drafts(&self, project_id: Uuid, limit: u32) -> Result<u64, StoreError> {
        delete_limited(&self.pool, "setup_drafts", "project_id = $1", project_id, limit).await
    }
}
