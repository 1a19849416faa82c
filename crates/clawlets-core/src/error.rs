//! Engine error type.
//!
//! Every operator- or runner-facing operation returns one of five error
//! kinds; the HTTP façade maps them onto status codes. Validation failures
//! surface as `Conflict` with a one-line human-readable message and are not
//! retried; `RateLimited` is advisory and idempotent on retry.

use clawlets_store::StoreError;

/// Errors raised by the scheduler engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No principal, or the presented credential is unusable.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The principal is known but lacks the required role.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The addressed resource does not exist (or is out of tenant scope).
    #[error("not found: {0}")]
    NotFound(String),

    /// The request contradicts current state or fails validation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Fixed-window rate limit exceeded for this principal/operation.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Storage layer failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Stable machine-readable code for the error kind.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::RateLimited(_) => "rate_limited",
            Self::Store(_) => "internal",
        }
    }
}
