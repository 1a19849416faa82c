//! Server configuration.
//!
//! Loaded from environment variables with sensible defaults. All settings
//! can be overridden via `CLAWLETS_*` variables.

use std::net::SocketAddr;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter (e.g., `info`, `debug`, `warn`).
    pub log_level: String,
    /// Development-only flag: skip authentication, act as a synthetic admin.
    pub auth_disabled: bool,
    /// Whether destructive maintenance routes are mounted.
    pub maintenance_enabled: bool,
    /// Seconds between timer-driven retention sweep passes.
    pub retention_sweep_interval_secs: u64,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// PostgreSQL (requires the `postgres-backend` feature).
    Postgres { url: String },
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PORT` — port to bind on (binds to `0.0.0.0`)
    /// - `CLAWLETS_BIND_ADDR` — full bind address (overrides `PORT`, default: `127.0.0.1:8420`)
    /// - `CLAWLETS_STORAGE` — `memory` or `postgres` (default: `memory`)
    /// - `DATABASE_URL` — PostgreSQL connection string (required when `CLAWLETS_STORAGE=postgres`)
    /// - `CLAWLETS_LOG_LEVEL` — log filter (default: `info`)
    /// - `CLAWLETS_AUTH_DISABLED` — development-only synthetic admin (default: `false`)
    /// - `CLAWLETS_MAINTENANCE_ENABLED` — mount destructive maintenance routes (default: `false`)
    /// - `CLAWLETS_RETENTION_SWEEP_INTERVAL` — seconds between sweep passes (default: `300`)
    #[must_use]
    pub fn from_env() -> Self {
        let bind_addr = if let Ok(addr) = std::env::var("CLAWLETS_BIND_ADDR") {
            addr.parse()
                .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8420)))
        } else if let Ok(port_str) = std::env::var("PORT") {
            let port: u16 = port_str.parse().unwrap_or(8420);
            SocketAddr::from(([0, 0, 0, 0], port))
        } else {
            SocketAddr::from(([127, 0, 0, 1], 8420))
        };

        let storage_backend = match std::env::var("CLAWLETS_STORAGE")
            .unwrap_or_else(|_| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "postgres" | "postgresql" => {
                let url = std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| "postgres://localhost/clawlets".to_owned());
                StorageBackendType::Postgres { url }
            }
            _ => StorageBackendType::Memory,
        };

        let log_level =
            std::env::var("CLAWLETS_LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());

        let auth_disabled = std::env::var("CLAWLETS_AUTH_DISABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let maintenance_enabled = std::env::var("CLAWLETS_MAINTENANCE_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let retention_sweep_interval_secs = std::env::var("CLAWLETS_RETENTION_SWEEP_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);

        Self {
            bind_addr,
            storage_backend,
            log_level,
            auth_disabled,
            maintenance_enabled,
            retention_sweep_interval_secs,
        }
    }
}
