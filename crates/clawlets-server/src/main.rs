//! Clawlets server binary.

use std::sync::Arc;

use anyhow::Context;
use clawlets_core::{ChannelScheduler, Engine, SystemClock};
use clawlets_server::config::{ServerConfig, StorageBackendType};
use clawlets_server::{app, drain_scheduled_calls, retention_timer};
use clawlets_store::{BlobStore, MemoryBlobStore, MemoryStore, Store};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    let store: Arc<dyn Store> = match &config.storage_backend {
        StorageBackendType::Memory => {
            tracing::warn!("using in-memory storage; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
        StorageBackendType::Postgres { url } => build_postgres_store(url).await?,
    };
    let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new());

    let (scheduler, scheduled_rx) = ChannelScheduler::new();
    let engine = Engine::new(store, blobs, Arc::new(SystemClock), Arc::new(scheduler))
        .with_auth_disabled(config.auth_disabled);
    if config.auth_disabled {
        tracing::warn!("authentication disabled; every caller is a synthetic admin");
    }

    tokio::spawn(drain_scheduled_calls(engine.clone(), scheduled_rx));
    tokio::spawn(retention_timer(
        engine.clone(),
        config.retention_sweep_interval_secs,
    ));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(
        addr = %config.bind_addr,
        maintenance = config.maintenance_enabled,
        "clawlets control plane listening"
    );
    axum::serve(listener, app(engine, config.maintenance_enabled))
        .await
        .context("server exited")?;
    Ok(())
}

#[cfg(feature = "postgres-backend")]
async fn build_postgres_store(url: &str) -> anyhow::Result<Arc<dyn Store>> {
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(16)
        .connect(url)
        .await
        .context("connecting to PostgreSQL")?;
    let store = clawlets_store::PgStore::new(pool);
    store.migrate().await.context("running schema migration")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres-backend"))]
async fn build_postgres_store(_url: &str) -> anyhow::Result<Arc<dyn Store>> {
    anyhow::bail!("this build lacks the postgres-backend feature")
}
