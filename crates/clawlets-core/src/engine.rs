//! The scheduler engine.
//!
//! [`Engine`] owns the collaborators every operation needs: the document
//! store, the blob store, the clock, and the delayed-work scheduler. The
//! operations themselves live in sibling modules (`queue`, `retention`,
//! `erasure`, ...) as `impl Engine` blocks.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use clawlets_store::{BlobStore, Store};

use crate::clock::Clock;
use crate::scheduler::Scheduler;

/// Coordination core of the control plane.
#[derive(Clone)]
pub struct Engine {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) blobs: Arc<dyn BlobStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) auth_disabled: bool,
}

impl Engine {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        blobs: Arc<dyn BlobStore>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            store,
            blobs,
            clock,
            scheduler,
            auth_disabled: false,
        }
    }

    /// Development-only flag: when set, the authz gate answers every
    /// request with a synthetic admin principal.
    #[must_use]
    pub fn with_auth_disabled(mut self, disabled: bool) -> Self {
        self.auth_disabled = disabled;
        self
    }

    /// Direct access to the store, for wiring and tests.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("auth_disabled", &self.auth_disabled)
            .finish_non_exhaustive()
    }
}
