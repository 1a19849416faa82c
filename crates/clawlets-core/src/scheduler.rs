//! Delayed-work seam.
//!
//! The engine never holds in-memory timers: retention continuations, erasure
//! steps, and similar follow-ups are handed to the host scheduler as
//! [`ScheduledCall`]s with a wall-clock delay. The server drains them through
//! a channel; tests record them and invoke the engine directly.

use std::sync::Mutex;
use std::time::Duration;

use uuid::Uuid;

/// An internal engine call to run after a delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduledCall {
    /// Continue a retention sweep pass under an existing lease.
    RetentionSweep { lease_id: Option<String> },
    /// Run the next erasure step for a deletion job.
    ErasureStep { deletion_job_id: Uuid },
}

/// Enqueues delayed internal calls.
pub trait Scheduler: Send + Sync + 'static {
    fn run_after(&self, delay: Duration, call: ScheduledCall);
}

/// Scheduler backed by a tokio channel: sleeps, then forwards the call to
/// whatever worker owns the receiving end.
#[derive(Debug, Clone)]
pub struct ChannelScheduler {
    tx: tokio::sync::mpsc::UnboundedSender<ScheduledCall>,
}

impl ChannelScheduler {
    /// Create a scheduler and the receiver its calls arrive on.
    #[must_use]
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<ScheduledCall>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Scheduler for ChannelScheduler {
    fn run_after(&self, delay: Duration, call: ScheduledCall) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Receiver gone means the server is shutting down.
            let _ = tx.send(call);
        });
    }
}

/// Test scheduler that records calls instead of running them.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    calls: Mutex<Vec<(Duration, ScheduledCall)>>,
}

impl RecordingScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every recorded call, oldest first.
    pub fn drain(&self) -> Vec<(Duration, ScheduledCall)> {
        self.calls.lock().map(|mut calls| std::mem::take(&mut *calls)).unwrap_or_default()
    }
}

impl Scheduler for RecordingScheduler {
    fn run_after(&self, delay: Duration, call: ScheduledCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((delay, call));
        }
    }
}
