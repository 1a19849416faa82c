//! Project access gate.
//!
//! End-user authentication happens outside the core — callers arrive with
//! an opaque authenticated principal (or none). This gate resolves the
//! principal against project ownership and membership. The admin check is
//! separate so viewers can read but never mutate.

use clawlets_store::models::{MemberRole, Project};
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::EngineError;

/// Synthetic principal handed out when authentication is disabled
/// (development only).
pub const DEV_PRINCIPAL: &str = "dev-admin";

/// Resolved access to a project.
#[derive(Debug, Clone)]
pub struct ProjectAccess {
    pub principal: String,
    pub project: Project,
    pub role: MemberRole,
}

impl Engine {
    /// Resolve the caller's principal, honoring the development flag.
    pub(crate) fn resolve_principal(
        &self,
        principal: Option<&str>,
    ) -> Result<String, EngineError> {
        match principal {
            Some(p) if !p.trim().is_empty() => Ok(p.to_owned()),
            _ if self.auth_disabled => Ok(DEV_PRINCIPAL.to_owned()),
            _ => Err(EngineError::Unauthorized(
                "authentication required".to_owned(),
            )),
        }
    }

    /// Resolve principal → `{principal, project, role}`, or fail with
    /// `unauthorized` / `not_found` / `forbidden`.
    pub async fn require_project_access(
        &self,
        principal: Option<&str>,
        project_id: Uuid,
    ) -> Result<ProjectAccess, EngineError> {
        let principal = self.resolve_principal(principal)?;
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| EngineError::NotFound("project not found".to_owned()))?;

        if self.auth_disabled || project.owner_id == principal {
            return Ok(ProjectAccess {
                principal,
                project,
                role: MemberRole::Admin,
            });
        }

        let member = self.store.get_member(project_id, &principal).await?;
        match member {
            Some(member) => Ok(ProjectAccess {
                principal,
                project,
                role: member.role,
            }),
            None => Err(EngineError::Forbidden(
                "no access to this project".to_owned(),
            )),
        }
    }

    /// Like [`require_project_access`](Engine::require_project_access) but
    /// the resolved role must be admin.
    pub async fn require_project_admin(
        &self,
        principal: Option<&str>,
        project_id: Uuid,
    ) -> Result<ProjectAccess, EngineError> {
        let access = self.require_project_access(principal, project_id).await?;
        if access.role != MemberRole::Admin {
            return Err(EngineError::Forbidden(
                "admin role required".to_owned(),
            ));
        }
        Ok(access)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use clawlets_store::models::{ExecutionMode, ProjectMember, WorkspaceRef};
    use clawlets_store::{MemoryBlobStore, MemoryStore};

    use super::*;
    use crate::clock::SystemClock;
    use crate::scheduler::RecordingScheduler;

    fn engine() -> Engine {
        Engine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(SystemClock),
            Arc::new(RecordingScheduler::new()),
        )
    }

    async fn seed_project(engine: &Engine, owner: &str) -> Project {
        let now = chrono::Utc::now();
        let project = Project {
            id: Uuid::new_v4(),
            owner_id: owner.to_owned(),
            name: "fleet".to_owned(),
            execution_mode: ExecutionMode::RemoteRunner,
            workspace: WorkspaceRef::Git {
                remote: "git@example.com:fleet/app.git".to_owned(),
                subpath: None,
            },
            local_path: None,
            runner_repo_path: Some("deploy".to_owned()),
            status: clawlets_store::models::ProjectStatus::Ready,
            created_at: now,
            updated_at: now,
        };
        engine.store().insert_project(&project).await.unwrap();
        project
    }

    #[tokio::test]
    async fn owner_is_admin_and_strangers_are_forbidden() {
        let engine = engine();
        let project = seed_project(&engine, "alice").await;

        let access = engine
            .require_project_access(Some("alice"), project.id)
            .await
            .unwrap();
        assert_eq!(access.role, MemberRole::Admin);

        let err = engine.require_project_access(Some("mallory"), project.id).await;
        assert!(matches!(err, Err(EngineError::Forbidden(_))));

        let err = engine.require_project_access(None, project.id).await;
        assert!(matches!(err, Err(EngineError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn viewers_read_but_cannot_mutate() {
        let engine = engine();
        let project = seed_project(&engine, "alice").await;
        engine
            .store()
            .insert_member(&ProjectMember {
                id: Uuid::new_v4(),
                project_id: project.id,
                user_id: "victor".to_owned(),
                role: MemberRole::Viewer,
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let access = engine
            .require_project_access(Some("victor"), project.id)
            .await
            .unwrap();
        assert_eq!(access.role, MemberRole::Viewer);

        let err = engine.require_project_admin(Some("victor"), project.id).await;
        assert!(matches!(err, Err(EngineError::Forbidden(_))));
    }

    #[tokio::test]
    async fn disabled_auth_yields_synthetic_admin() {
        let engine = engine().with_auth_disabled(true);
        let project = seed_project(&engine, "alice").await;
        let access = engine.require_project_access(None, project.id).await.unwrap();
        assert_eq!(access.principal, DEV_PRINCIPAL);
        assert_eq!(access.role, MemberRole::Admin);
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let engine = engine();
        let err = engine
            .require_project_access(Some("alice"), Uuid::new_v4())
            .await;
        assert!(matches!(err, Err(EngineError::NotFound(_))));
    }
}
