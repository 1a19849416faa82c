//! Storage error type shared by every backend.

/// Errors raised by [`Store`](crate::Store) and [`BlobStore`](crate::BlobStore)
/// implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A read against the backend failed.
    #[error("storage read failed: {0}")]
    Read(String),

    /// A write against the backend failed.
    #[error("storage write failed: {0}")]
    Write(String),

    /// A uniqueness constraint was violated (duplicate key).
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// The backend rejected the operation (connection loss, pool exhaustion).
    #[error("storage backend unavailable: {0}")]
    Backend(String),
}

#[cfg(feature = "postgres-backend")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                // PostgreSQL unique violation
                if db_err.code().as_deref() == Some("23505") {
                    Self::Duplicate(db_err.message().to_owned())
                } else {
                    Self::Write(format!("database error: {db_err}"))
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::Backend(err.to_string())
            }
            _ => Self::Read(format!("database error: {err}")),
        }
    }
}
