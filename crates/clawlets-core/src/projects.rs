//! Project lifecycle operations: create, membership, retention policy.
//!
//! Project rows are the tenant roots everything else hangs off. Creation
//! starts in status `creating`; the run/project projector moves it to
//! `ready` or `error` once the init/import run finishes.

use chrono::Duration;
use clawlets_store::models::{
    ExecutionMode, MemberRole, Project, ProjectMember, ProjectPolicy, ProjectStatus, WorkspaceRef,
};
use uuid::Uuid;

use crate::audit::{AuditEvent, MemberData, MemberTarget, ProjectCreateData, RetentionPolicyData};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::validate::{ensure_bounded_string, validate_repo_path};

/// Arguments for [`Engine::create_project`].
#[derive(Debug, Clone)]
pub struct CreateProjectArgs {
    pub name: String,
    pub execution_mode: ExecutionMode,
    pub workspace: WorkspaceRef,
    pub local_path: Option<String>,
    pub runner_repo_path: Option<String>,
}

impl Engine {
    /// Create a project in status `creating`.
    ///
    /// The workspace reference must match the execution mode: a local
    /// project carries a `local` workspace hash and a local path; a
    /// remote-runner project carries a `git` workspace and a repo path.
    pub async fn create_project(
        &self,
        principal: Option<&str>,
        args: CreateProjectArgs,
    ) -> Result<Project, EngineError> {
        let principal = self.resolve_principal(principal)?;
        self.check_rate_limit(
            &format!("projects.create:{principal}"),
            10,
            Duration::minutes(1),
        )
        .await?;

        let name = ensure_bounded_string(&args.name, "name", 100)?;
        match (args.execution_mode, &args.workspace) {
            (ExecutionMode::Local, WorkspaceRef::Local { .. }) => {
                if args.local_path.is_none() || args.runner_repo_path.is_some() {
                    return Err(EngineError::Conflict(
                        "local projects carry a local path and no runner repo path".to_owned(),
                    ));
                }
            }
            (ExecutionMode::RemoteRunner, WorkspaceRef::Git { .. }) => {
                if args.runner_repo_path.is_none() || args.local_path.is_some() {
                    return Err(EngineError::Conflict(
                        "remote-runner projects carry a runner repo path and no local path"
                            .to_owned(),
                    ));
                }
            }
            _ => {
                return Err(EngineError::Conflict(
                    "workspace kind does not match execution mode".to_owned(),
                ));
            }
        }
        let runner_repo_path = args
            .runner_repo_path
            .as_deref()
            .map(|p| validate_repo_path(p, "runner_repo_path"))
            .transpose()?;

        let now = self.now();
        let project = Project {
            id: Uuid::new_v4(),
            owner_id: principal.clone(),
            name: name.clone(),
            execution_mode: args.execution_mode,
            workspace: args.workspace,
            local_path: args.local_path,
            runner_repo_path,
            status: ProjectStatus::Creating,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_project(&project).await.map_err(|e| match e {
            clawlets_store::StoreError::Duplicate(_) => {
                EngineError::Conflict(format!("project name '{name}' already in use"))
            }
            other => EngineError::Store(other),
        })?;

        self.append_audit(
            &principal,
            Some(project.id),
            AuditEvent::ProjectCreate {
                data: ProjectCreateData { name },
            },
        )
        .await?;

        tracing::info!(project_id = %project.id, owner = %principal, "project created");
        Ok(project)
    }

    /// Add a member to a project (admin only).
    pub async fn add_project_member(
        &self,
        principal: Option<&str>,
        project_id: Uuid,
        user_id: &str,
        role: MemberRole,
    ) -> Result<ProjectMember, EngineError> {
        let access = self.require_project_admin(principal, project_id).await?;
        self.check_rate_limit(
            &format!("members.add:{}", access.principal),
            30,
            Duration::minutes(1),
        )
        .await?;
        let user_id = ensure_bounded_string(user_id, "user_id", 128)?;

        let member = ProjectMember {
            id: Uuid::new_v4(),
            project_id,
            user_id: user_id.clone(),
            role,
            created_at: self.now(),
        };
        self.store.insert_member(&member).await.map_err(|e| match e {
            clawlets_store::StoreError::Duplicate(_) => {
                EngineError::Conflict("member already exists".to_owned())
            }
            other => EngineError::Store(other),
        })?;

        self.append_audit(
            &access.principal,
            Some(project_id),
            AuditEvent::MemberAdd {
                target: MemberTarget { user_id },
                data: MemberData {
                    role: role.to_string(),
                },
            },
        )
        .await?;
        Ok(member)
    }

    /// Set the project's retention policy in days (admin only).
    ///
    /// The sweeper clamps to `[1, 365]` when applying; writes outside that
    /// range are rejected outright.
    pub async fn set_retention_policy(
        &self,
        principal: Option<&str>,
        project_id: Uuid,
        retention_days: i64,
    ) -> Result<ProjectPolicy, EngineError> {
        let access = self.require_project_admin(principal, project_id).await?;
        if !(1..=365).contains(&retention_days) {
            return Err(EngineError::Conflict(
                "retention_days must be within [1, 365]".to_owned(),
            ));
        }

        let policy = ProjectPolicy {
            id: Uuid::new_v4(),
            project_id,
            retention_days,
            updated_at: self.now(),
        };
        self.store.upsert_policy(&policy).await?;

        self.append_audit(
            &access.principal,
            Some(project_id),
            AuditEvent::RetentionPolicyUpdate {
                data: RetentionPolicyData { retention_days },
            },
        )
        .await?;
        Ok(policy)
    }
}
