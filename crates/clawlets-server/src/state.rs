//! Shared application state.

use clawlets_core::Engine;

/// State handed to every route handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub engine: Engine,
}

impl AppState {
    #[must_use]
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }
}
