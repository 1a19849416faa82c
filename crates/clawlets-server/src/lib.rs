//! Clawlets HTTP server library.
//!
//! Wires the engine to the axum router, drains the delayed-work channel,
//! and drives the timer-based retention sweep.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::time::Duration;

use clawlets_core::{Engine, ScheduledCall};
use tokio::sync::mpsc::UnboundedReceiver;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the application router with tracing.
#[must_use]
pub fn app(engine: Engine, maintenance_enabled: bool) -> axum::Router {
    routes::build_router(maintenance_enabled)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState::new(engine))
}

/// Drain scheduled internal calls until the channel closes.
pub async fn drain_scheduled_calls(engine: Engine, mut rx: UnboundedReceiver<ScheduledCall>) {
    while let Some(call) = rx.recv().await {
        match call {
            ScheduledCall::RetentionSweep { lease_id } => {
                if let Err(e) = engine
                    .run_retention_sweep(Some("scheduled"), lease_id.as_deref())
                    .await
                {
                    tracing::error!(error = %e, "scheduled retention sweep failed");
                }
            }
            ScheduledCall::ErasureStep { deletion_job_id } => {
                if let Err(e) = engine.run_deletion_job_step(deletion_job_id).await {
                    tracing::error!(error = %e, job_id = %deletion_job_id, "erasure step failed");
                }
            }
        }
    }
}

/// Kick a retention sweep on a fixed interval. The sweep itself no-ops
/// when another holder's lease is active, so extra ticks are cheap.
pub async fn retention_timer(engine: Engine, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(30)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        if let Err(e) = engine.run_retention_sweep(Some("timer"), None).await {
            tracing::error!(error = %e, "timer retention sweep failed");
        }
    }
}
