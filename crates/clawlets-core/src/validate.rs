//! Contract-enforcement validators used by every mutating entrypoint.

use clawlets_store::models::{
    EventLevel, GatewaySummary, HostSummary, RunEvent, RunEventMeta,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::EngineError;
use crate::redact::redact_message;

/// Keys that may never appear in a job payload, at any depth.
const SECRET_LIKE_KEYS: &[&str] = &[
    "value",
    "token",
    "key",
    "password",
    "secret",
    "apikey",
    "privatekey",
];

/// Job kinds must match `^[A-Za-z0-9._-]+$`.
const MAX_JOB_KIND_LEN: usize = 64;

/// Stored run-event messages are clamped to this many characters.
const MAX_EVENT_MESSAGE_LEN: usize = 2048;

/// At most this many run events per append batch.
pub const MAX_RUN_EVENTS_PER_BATCH: usize = 200;

const MAX_SUMMARY_COUNT: i64 = 10_000;
const MAX_SUMMARY_ARRAY_LEN: usize = 256;
const MAX_SUMMARY_ENTRY_LEN: usize = 128;

/// Trim and bound a required string; control characters are rejected.
pub fn ensure_bounded_string(
    value: &str,
    field: &str,
    max: usize,
) -> Result<String, EngineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Conflict(format!("{field} must not be empty")));
    }
    if trimmed.chars().count() > max {
        return Err(EngineError::Conflict(format!(
            "{field} exceeds {max} characters"
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(EngineError::Conflict(format!(
            "{field} contains control characters"
        )));
    }
    Ok(trimmed.to_owned())
}

/// Optional variant of [`ensure_bounded_string`].
pub fn ensure_bounded_string_opt(
    value: Option<&str>,
    field: &str,
    max: usize,
) -> Result<Option<String>, EngineError> {
    value
        .map(|v| ensure_bounded_string(v, field, max))
        .transpose()
}

/// Validate and normalize a job kind (`^[A-Za-z0-9._-]+$`, bounded).
pub fn validate_job_kind(kind: &str) -> Result<String, EngineError> {
    let kind = ensure_bounded_string(kind, "kind", MAX_JOB_KIND_LEN)?;
    let valid = kind
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !valid {
        return Err(EngineError::Conflict(format!(
            "kind '{kind}' contains characters outside [A-Za-z0-9._-]"
        )));
    }
    Ok(kind)
}

/// Walk a JSON payload and reject any object key whose lowercased trimmed
/// name is in the banned secret-like set. This is the pre-insert filter
/// behind the no-plaintext-secrets-at-rest invariant.
pub fn assert_no_secret_like_keys(payload: &serde_json::Value) -> Result<(), EngineError> {
    match payload {
        serde_json::Value::Object(map) => {
            for (key, value) in map {
                let normalized = key.trim().to_ascii_lowercase();
                if SECRET_LIKE_KEYS.contains(&normalized.as_str()) {
                    return Err(EngineError::Conflict(format!(
                        "payload must not carry secret-like key '{key}'"
                    )));
                }
                assert_no_secret_like_keys(value)?;
            }
            Ok(())
        }
        serde_json::Value::Array(items) => {
            for item in items {
                assert_no_secret_like_keys(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Per-kind payload policy. Known deployment kinds constrain their
/// payload shape; unknown kinds accept any non-secret object.
pub fn validate_payload_for_kind(
    kind: &str,
    payload: Option<&serde_json::Value>,
) -> Result<(), EngineError> {
    let Some(payload) = payload else {
        return Ok(());
    };
    let Some(map) = payload.as_object() else {
        return Err(EngineError::Conflict(
            "payload_meta must be a JSON object".to_owned(),
        ));
    };
    match kind {
        "host_deploy" | "infra_apply" => {
            let host = map.get("host").and_then(serde_json::Value::as_str);
            match host {
                Some(host) => {
                    ensure_bounded_string(host, "payload_meta.host", 253)?;
                }
                None => {
                    return Err(EngineError::Conflict(format!(
                        "kind '{kind}' requires a 'host' string in payload_meta"
                    )));
                }
            }
        }
        "project_init" | "project_import" => {
            for key in map.keys() {
                if !matches!(key.as_str(), "source" | "branch" | "subpath") {
                    return Err(EngineError::Conflict(format!(
                        "kind '{kind}' does not accept payload key '{key}'"
                    )));
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Validate a sealed-input envelope: non-empty base64url, no padding, at
/// most 2 MiB. The control-character ban falls out of the charset.
pub fn validate_sealed_envelope(sealed_b64: &str) -> Result<(), EngineError> {
    if sealed_b64.is_empty() {
        return Err(EngineError::Conflict(
            "sealed input must not be empty".to_owned(),
        ));
    }
    if sealed_b64.len() > 2 * 1024 * 1024 {
        return Err(EngineError::Conflict(
            "sealed input exceeds 2 MiB".to_owned(),
        ));
    }
    let valid = sealed_b64
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'));
    if !valid {
        return Err(EngineError::Conflict(
            "sealed input is not base64url".to_owned(),
        ));
    }
    Ok(())
}

/// Validate a repo-relative path: no leading `/`, no drive prefix, no `..`
/// segments, no control characters.
pub fn validate_repo_path(path: &str, field: &str) -> Result<String, EngineError> {
    let path = ensure_bounded_string(path, field, 512)?;
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(EngineError::Conflict(format!("{field} must be relative")));
    }
    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return Err(EngineError::Conflict(format!(
            "{field} must not carry a drive prefix"
        )));
    }
    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(EngineError::Conflict(format!(
            "{field} must not contain '..' segments"
        )));
    }
    Ok(path)
}

fn clamp_count(value: i64) -> i64 {
    value.clamp(0, MAX_SUMMARY_COUNT)
}

fn clamp_ports(ports: &[i64]) -> Vec<u16> {
    ports
        .iter()
        .take(MAX_SUMMARY_ARRAY_LEN)
        .filter_map(|p| u16::try_from(*p).ok().filter(|p| *p >= 1))
        .collect()
}

fn clamp_entries(entries: &[String]) -> Vec<String> {
    entries
        .iter()
        .take(MAX_SUMMARY_ARRAY_LEN)
        .map(|e| e.trim().chars().take(MAX_SUMMARY_ENTRY_LEN).collect())
        .filter(|e: &String| !e.is_empty())
        .collect()
}

/// Raw host summary as reported by a runner, before clamping.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RawHostSummary {
    #[serde(default)]
    pub service_count: i64,
    #[serde(default)]
    pub container_count: i64,
    #[serde(default)]
    pub open_ports: Vec<i64>,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Clip counts to `[0, 10 000]`, ports to `[1, 65 535]`, arrays to their
/// first 256 entries with each entry bounded.
#[must_use]
pub fn sanitize_desired_host_summary(raw: &RawHostSummary) -> HostSummary {
    HostSummary {
        service_count: clamp_count(raw.service_count),
        container_count: clamp_count(raw.container_count),
        open_ports: clamp_ports(&raw.open_ports),
        roles: clamp_entries(&raw.roles),
    }
}

/// Raw gateway summary as reported by a runner, before clamping.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RawGatewaySummary {
    #[serde(default)]
    pub endpoint_count: i64,
    #[serde(default)]
    pub listen_ports: Vec<i64>,
    #[serde(default)]
    pub networks: Vec<String>,
}

/// Gateway-side counterpart of [`sanitize_desired_host_summary`].
#[must_use]
pub fn sanitize_desired_gateway_summary(raw: &RawGatewaySummary) -> GatewaySummary {
    GatewaySummary {
        endpoint_count: clamp_count(raw.endpoint_count),
        listen_ports: clamp_ports(&raw.listen_ports),
        networks: clamp_entries(&raw.networks),
    }
}

/// A run event as submitted by a runner.
#[derive(Debug, Clone, Deserialize)]
pub struct RunEventInput {
    pub level: EventLevel,
    pub message: String,
    #[serde(default)]
    pub ts: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub meta: Option<RunEventMeta>,
}

/// Sanitize up to 200 runner-reported events for storage: trim and redact
/// messages, clamp length, and validate exit-code metadata. The phase tag
/// set is closed at the type level.
pub fn sanitize_runner_run_events_for_storage(
    project_id: Uuid,
    run_id: Uuid,
    events: &[RunEventInput],
    now: chrono::DateTime<chrono::Utc>,
) -> Result<Vec<RunEvent>, EngineError> {
    if events.len() > MAX_RUN_EVENTS_PER_BATCH {
        return Err(EngineError::Conflict(format!(
            "at most {MAX_RUN_EVENTS_PER_BATCH} events per batch"
        )));
    }
    let mut sanitized = Vec::with_capacity(events.len());
    for event in events {
        if let Some(RunEventMeta::Exit { code }) = event.meta {
            if !(-1..=255).contains(&code) {
                return Err(EngineError::Conflict(format!(
                    "exit code {code} outside [-1, 255]"
                )));
            }
        }
        let message: String = redact_message(event.message.trim())
            .chars()
            .take(MAX_EVENT_MESSAGE_LEN)
            .collect();
        sanitized.push(RunEvent {
            id: Uuid::new_v4(),
            project_id,
            run_id,
            ts: event.ts.unwrap_or(now),
            level: event.level,
            message,
            meta: event.meta,
        });
    }
    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_kind_charset_is_enforced() {
        assert!(validate_job_kind("host_deploy").is_ok());
        assert!(validate_job_kind("a.b-c_9").is_ok());
        assert!(validate_job_kind("bad kind").is_err());
        assert!(validate_job_kind("").is_err());
    }

    #[test]
    fn secret_like_keys_are_rejected_at_any_depth() {
        assert!(assert_no_secret_like_keys(&json!({"foo": 1})).is_ok());
        assert!(assert_no_secret_like_keys(&json!({"Token ": "x"})).is_err());
        assert!(assert_no_secret_like_keys(&json!({"nested": {"password": "x"}})).is_err());
        assert!(assert_no_secret_like_keys(&json!([{"apikey": "x"}])).is_err());
    }

    #[test]
    fn payload_policy_checks_known_kinds() {
        assert!(validate_payload_for_kind("host_deploy", Some(&json!({"host": "web-1"}))).is_ok());
        assert!(validate_payload_for_kind("host_deploy", Some(&json!({"foo": 1}))).is_err());
        assert!(
            validate_payload_for_kind("project_import", Some(&json!({"source": "git"}))).is_ok()
        );
        assert!(
            validate_payload_for_kind("project_import", Some(&json!({"host": "web-1"}))).is_err()
        );
        assert!(validate_payload_for_kind("custom", Some(&json!({"anything": 1}))).is_ok());
    }

    #[test]
    fn sealed_envelope_charset_and_bounds() {
        assert!(validate_sealed_envelope("abc_DEF-123").is_ok());
        assert!(validate_sealed_envelope("").is_err());
        assert!(validate_sealed_envelope("not base64url!").is_err());
        assert!(validate_sealed_envelope("has=padding").is_err());
    }

    #[test]
    fn repo_paths_are_relative_and_clean() {
        assert!(validate_repo_path("deploy/app", "path").is_ok());
        assert!(validate_repo_path("/etc/passwd", "path").is_err());
        assert!(validate_repo_path("C:\\temp", "path").is_err());
        assert!(validate_repo_path("a/../b", "path").is_err());
    }

    #[test]
    fn summaries_are_clamped() {
        let raw = RawHostSummary {
            service_count: 1_000_000,
            container_count: -5,
            open_ports: vec![0, 80, 443, 70_000],
            roles: vec!["web".to_owned(); 400],
        };
        let summary = sanitize_desired_host_summary(&raw);
        assert_eq!(summary.service_count, 10_000);
        assert_eq!(summary.container_count, 0);
        assert_eq!(summary.open_ports, vec![80, 443]);
        assert_eq!(summary.roles.len(), 256);
    }

    #[test]
    fn run_events_are_redacted_and_clamped() {
        let project = Uuid::new_v4();
        let run = Uuid::new_v4();
        let events = vec![RunEventInput {
            level: EventLevel::Info,
            message: format!("token=abc {}", "x".repeat(5000)),
            ts: None,
            meta: Some(RunEventMeta::Exit { code: 0 }),
        }];
        let out =
            sanitize_runner_run_events_for_storage(project, run, &events, chrono::Utc::now())
                .unwrap();
        assert!(out[0].message.starts_with("token=[REDACTED]"));
        assert!(out[0].message.chars().count() <= 2048);

        let bad = vec![RunEventInput {
            level: EventLevel::Error,
            message: "exit".to_owned(),
            ts: None,
            meta: Some(RunEventMeta::Exit { code: 400 }),
        }];
        assert!(
            sanitize_runner_run_events_for_storage(project, run, &bad, chrono::Utc::now())
                .is_err()
        );
    }
}
