//! Clawlets scheduler core.
//!
//! The coordination engine behind the fleet control plane: a transactional
//! job queue with lease-based execution, sealed-input envelope reservations
//! for secret-bearing payloads, time-bounded tenant erasure, metered
//! retention sweeps, and per-tenant rate limiting.
//!
//! The engine maintains a few hard invariants across machine failures,
//! client retries, and concurrent operators:
//!
//! - at most one executor per job (lease ids rotate on every claim)
//! - bounded attempts (cap 25) and absorbing terminal states
//! - no plaintext secrets at rest (sealed envelopes stay opaque; payload
//!   metadata is filtered for secret-like keys before insert)
//! - eventual terminality (stale leases requeue, stale reservations fail)
//!
//! Storage is consumed through the [`clawlets_store::Store`] trait; delayed
//! work goes through the [`scheduler::Scheduler`] seam instead of in-memory
//! timers.

pub mod audit;
pub mod authz;
pub mod clock;
pub mod drafts;
pub mod engine;
pub mod erasure;
pub mod error;
pub mod ingest;
mod limiter;
pub mod projects;
mod projector;
pub mod queue;
pub mod redact;
pub mod results;
pub mod retention;
pub mod runner_auth;
pub mod scheduler;
pub mod util;
pub mod validate;

/// The only sealed-input algorithm the control plane accepts.
pub const SEALED_INPUT_ALG: &str = "rsa-oaep-3072/aes-256-gcm";

pub use authz::ProjectAccess;
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::Engine;
pub use erasure::{DeleteStartOutcome, ErasureStage};
pub use error::EngineError;
pub use ingest::{MetadataSyncCounts, MetadataSyncRequest};
pub use projects::CreateProjectArgs;
pub use queue::{EnqueueArgs, JobOutcome, SealedReservation};
pub use results::{CompletionSlot, TakenResult};
pub use retention::RetentionSummary;
pub use runner_auth::RunnerIdentity;
pub use scheduler::{ChannelScheduler, RecordingScheduler, ScheduledCall, Scheduler};
