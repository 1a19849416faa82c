//! Runner identity: registration, bearer tokens, heartbeat ingest.
//!
//! Runner tokens are minted once (32 bytes, base64url), stored only as a
//! SHA-256 hex digest, and bound to `(project, runner)`. Validation walks
//! strip-prefix → hash → lookup → liveness checks; a successful call emits
//! a rate-limited last-used touch so a busy runner does not turn every
//! request into a write.

use chrono::{DateTime, Duration, Utc};
use clawlets_store::models::{Runner, RunnerCapabilities, RunnerStatus, RunnerToken};
use uuid::Uuid;

use crate::SEALED_INPUT_ALG;
use crate::audit::{
    AuditEvent, RunnerRegisterData, RunnerTarget, TokenCreateData, TokenTarget,
};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::util::{b64url_decode, random_token, sha256_b64url, sha256_hex};
use crate::validate::ensure_bounded_string;

/// Minimum interval between persisted `last_used_at` touches.
const TOKEN_TOUCH_FLOOR: Duration = Duration::seconds(60);

/// An authenticated runner request.
#[derive(Debug, Clone)]
pub struct RunnerIdentity {
    pub token: RunnerToken,
    pub runner: Runner,
}

impl Engine {
    /// Register a runner and mint its bearer token (admin only).
    ///
    /// Returns the runner row and the plaintext token — shown once, never
    /// stored.
    pub async fn register_runner(
        &self,
        principal: Option<&str>,
        project_id: Uuid,
        name: &str,
        token_expires_at: Option<DateTime<Utc>>,
    ) -> Result<(Runner, String), EngineError> {
        let access = self.require_project_admin(principal, project_id).await?;
        self.check_rate_limit(
            &format!("runners.register:{}", access.principal),
            30,
            Duration::minutes(1),
        )
        .await?;
        let name = ensure_bounded_string(name, "name", 128)?;

        let now = self.now();
        let runner = Runner {
            id: Uuid::new_v4(),
            project_id,
            name: name.clone(),
            version: None,
            last_seen_at: None,
            last_status: RunnerStatus::Offline,
            capabilities: RunnerCapabilities::default(),
            created_at: now,
        };
        self.store.insert_runner(&runner).await.map_err(|e| match e {
            clawlets_store::StoreError::Duplicate(_) => {
                EngineError::Conflict(format!("runner name '{name}' already in use"))
            }
            other => EngineError::Store(other),
        })?;

        let plaintext = random_token();
        let token = RunnerToken {
            id: Uuid::new_v4(),
            project_id,
            runner_id: runner.id,
            token_hash: sha256_hex(plaintext.as_bytes()),
            expires_at: token_expires_at,
            revoked_at: None,
            last_used_at: None,
            created_at: now,
        };
        self.store.insert_runner_token(&token).await?;

        self.append_audit(
            &access.principal,
            Some(project_id),
            AuditEvent::RunnerRegister {
                target: RunnerTarget { runner_id: runner.id },
                data: RunnerRegisterData { name },
            },
        )
        .await?;
        self.append_audit(
            &access.principal,
            Some(project_id),
            AuditEvent::RunnerTokenCreate {
                target: TokenTarget { token_id: token.id },
                data: TokenCreateData { runner_id: runner.id },
            },
        )
        .await?;

        tracing::info!(runner_id = %runner.id, project_id = %project_id, "runner registered");
        Ok((runner, plaintext))
    }

    /// Revoke a runner token (admin only). Revoked tokens fail validation
    /// immediately; the runner row survives.
    pub async fn revoke_runner_token(
        &self,
        principal: Option<&str>,
        project_id: Uuid,
        token_id: Uuid,
    ) -> Result<(), EngineError> {
        let access = self.require_project_admin(principal, project_id).await?;
        let token = self
            .store
            .get_runner_token(token_id)
            .await?
            .filter(|t| t.project_id == project_id)
            .ok_or_else(|| EngineError::NotFound("runner token not found".to_owned()))?;

        self.store.revoke_runner_token(token.id, self.now()).await?;
        self.append_audit(
            &access.principal,
            Some(project_id),
            AuditEvent::RunnerTokenRevoke {
                target: TokenTarget { token_id: token.id },
            },
        )
        .await?;
        Ok(())
    }

    /// Validate a bearer token and resolve the runner it is bound to.
    ///
    /// A token is usable iff it is not revoked, is not past its expiry,
    /// matches the caller-asserted project (when given), and references a
    /// live runner in the same project.
    pub async fn authenticate_runner(
        &self,
        bearer_token: &str,
        asserted_project: Option<Uuid>,
    ) -> Result<RunnerIdentity, EngineError> {
        let unusable = || EngineError::Unauthorized("invalid or expired runner token".to_owned());

        let token_hash = sha256_hex(bearer_token.trim().as_bytes());
        let token = self
            .store
            .get_runner_token_by_hash(&token_hash)
            .await?
            .ok_or_else(unusable)?;

        let now = self.now();
        if token.revoked_at.is_some() {
            return Err(unusable());
        }
        if token.expires_at.is_some_and(|exp| exp <= now) {
            return Err(unusable());
        }
        if asserted_project.is_some_and(|p| p != token.project_id) {
            return Err(unusable());
        }
        let runner = self
            .store
            .get_runner(token.runner_id)
            .await?
            .filter(|r| r.project_id == token.project_id)
            .ok_or_else(unusable)?;

        // Rate-limited touch: only write when the last one is old enough.
        let stale = token
            .last_used_at
            .is_none_or(|last| now - last >= TOKEN_TOUCH_FLOOR);
        if stale {
            if let Err(e) = self.store.touch_runner_token(token.id, now).await {
                tracing::warn!(error = %e, token_id = %token.id, "last-used touch failed");
            }
        }

        Ok(RunnerIdentity { token, runner })
    }

    /// Ingest a runner heartbeat: refresh liveness and the capability
    /// record. The reported name must match the token's runner.
    pub async fn runner_heartbeat(
        &self,
        identity: &RunnerIdentity,
        runner_name: &str,
        version: Option<&str>,
        capabilities: Option<RunnerCapabilities>,
    ) -> Result<Runner, EngineError> {
        if identity.runner.name != runner_name {
            return Err(EngineError::Unauthorized(
                "token is not bound to this runner".to_owned(),
            ));
        }
        let capabilities = match capabilities {
            Some(raw) => normalize_capabilities(raw)?,
            None => identity.runner.capabilities.clone(),
        };

        let now = self.now();
        self.store
            .update_runner_heartbeat(identity.runner.id, now, version, &capabilities)
            .await?;
        self.store
            .get_runner(identity.runner.id)
            .await?
            .ok_or_else(|| EngineError::NotFound("runner not found".to_owned()))
    }
}

/// Validate a reported capability record and derive the sealed-input key
/// id from the SPKI bytes. A client-asserted key id that does not match
/// the derived one is rejected.
fn normalize_capabilities(
    mut caps: RunnerCapabilities,
) -> Result<RunnerCapabilities, EngineError> {
    if !caps.supports_sealed_input {
        caps.sealed_input_alg = None;
        caps.sealed_input_public_key_spki = None;
        caps.sealed_input_key_id = None;
        return Ok(caps);
    }

    let alg = caps
        .sealed_input_alg
        .as_deref()
        .ok_or_else(|| EngineError::Conflict("sealed-input capability requires an algorithm".to_owned()))?;
    if alg != SEALED_INPUT_ALG {
        return Err(EngineError::Conflict(format!(
            "unsupported sealed-input algorithm '{alg}'"
        )));
    }
    let spki = caps
        .sealed_input_public_key_spki
        .as_deref()
        .ok_or_else(|| EngineError::Conflict("sealed-input capability requires a public key".to_owned()))?;
    let spki_bytes = b64url_decode(spki)
        .map_err(|_| EngineError::Conflict("public key is not base64url".to_owned()))?;
    let key_id = sha256_b64url(&spki_bytes);
    if caps
        .sealed_input_key_id
        .as_deref()
        .is_some_and(|asserted| asserted != key_id)
    {
        return Err(EngineError::Conflict(
            "asserted key id does not match the public key".to_owned(),
        ));
    }
    caps.sealed_input_key_id = Some(key_id);
    Ok(caps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::b64url_encode;

    #[test]
    fn key_id_is_derived_from_spki() {
        let spki = b64url_encode(b"fake-spki-bytes");
        let caps = RunnerCapabilities {
            supports_sealed_input: true,
            sealed_input_alg: Some(SEALED_INPUT_ALG.to_owned()),
            sealed_input_public_key_spki: Some(spki),
            sealed_input_key_id: None,
            supports_infra_apply: false,
            nix_available: true,
        };
        let normalized = normalize_capabilities(caps).unwrap();
        assert_eq!(
            normalized.sealed_input_key_id.as_deref(),
            Some(sha256_b64url(b"fake-spki-bytes").as_str())
        );
    }

    #[test]
    fn wrong_algorithm_is_rejected() {
        let caps = RunnerCapabilities {
            supports_sealed_input: true,
            sealed_input_alg: Some("rsa-oaep-2048/aes-128-gcm".to_owned()),
            sealed_input_public_key_spki: Some(b64url_encode(b"spki")),
            sealed_input_key_id: None,
            supports_infra_apply: false,
            nix_available: false,
        };
        assert!(normalize_capabilities(caps).is_err());
    }

    #[test]
    fn mismatched_asserted_key_id_is_rejected() {
        let caps = RunnerCapabilities {
            supports_sealed_input: true,
            sealed_input_alg: Some(SEALED_INPUT_ALG.to_owned()),
            sealed_input_public_key_spki: Some(b64url_encode(b"spki")),
            sealed_input_key_id: Some("not-the-right-id".to_owned()),
            supports_infra_apply: false,
            nix_available: false,
        };
        assert!(normalize_capabilities(caps).is_err());
    }

    #[test]
    fn unsupported_sealed_input_clears_the_triple() {
        let caps = RunnerCapabilities {
            supports_sealed_input: false,
            sealed_input_alg: Some(SEALED_INPUT_ALG.to_owned()),
            sealed_input_public_key_spki: Some(b64url_encode(b"spki")),
            sealed_input_key_id: Some("stale".to_owned()),
            supports_infra_apply: true,
            nix_available: false,
        };
        let normalized = normalize_capabilities(caps).unwrap();
        assert!(normalized.sealed_input_alg.is_none());
        assert!(normalized.sealed_input_key_id.is_none());
    }
}
