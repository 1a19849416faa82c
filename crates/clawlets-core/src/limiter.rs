//! Fixed-window rate limiter.
//!
//! One operation: check-and-increment on a `(principal, operation)` key.
//! The counter rides on a store row and is best-effort — losing it on a
//! node restart only opens one extra window.

use chrono::Duration;
use clawlets_store::models::RateLimitRow;

use crate::engine::Engine;
use crate::error::EngineError;

impl Engine {
    /// Count one call against `key`. Fails with [`EngineError::RateLimited`]
    /// once `limit` calls have landed inside the current window.
    pub(crate) async fn check_rate_limit(
        &self,
        key: &str,
        limit: i64,
        window: Duration,
    ) -> Result<(), EngineError> {
        let now = self.now();
        let row = self.store.get_rate_limit(key).await?;
        let next = match row {
            None => RateLimitRow {
                key: key.to_owned(),
                window_start: now,
                count: 1,
            },
            Some(row) if now - row.window_start >= window => RateLimitRow {
                window_start: now,
                count: 1,
                ..row
            },
            Some(row) if row.count < limit => RateLimitRow {
                count: row.count + 1,
                ..row
            },
            Some(_) => {
                return Err(EngineError::RateLimited(format!(
                    "rate limit exceeded for {key}"
                )));
            }
        };
        self.store.put_rate_limit(&next).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use clawlets_store::{MemoryBlobStore, MemoryStore};

    use super::*;
    use crate::clock::ManualClock;
    use crate::scheduler::RecordingScheduler;

    fn engine_with_clock() -> (Engine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let engine = Engine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryBlobStore::new()),
            clock.clone(),
            Arc::new(RecordingScheduler::new()),
        );
        (engine, clock)
    }

    #[tokio::test]
    async fn third_call_in_window_is_rejected() {
        let (engine, _) = engine_with_clock();
        let window = Duration::minutes(1);
        engine.check_rate_limit("op:alice", 2, window).await.unwrap();
        engine.check_rate_limit("op:alice", 2, window).await.unwrap();
        let err = engine.check_rate_limit("op:alice", 2, window).await;
        assert!(matches!(err, Err(EngineError::RateLimited(_))));
        // A different principal has its own window.
        engine.check_rate_limit("op:bob", 2, window).await.unwrap();
    }

    #[tokio::test]
    async fn window_rolls_over() {
        let (engine, clock) = engine_with_clock();
        let window = Duration::minutes(1);
        engine.check_rate_limit("op:alice", 1, window).await.unwrap();
        assert!(engine.check_rate_limit("op:alice", 1, window).await.is_err());
        clock.advance(Duration::minutes(1));
        engine.check_rate_limit("op:alice", 1, window).await.unwrap();
    }
}
