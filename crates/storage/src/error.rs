//! Error types for the statistic stores.

use thiserror::Error;

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid database configuration: {0}")]
    Configuration(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Unknown column: {0}")]
    InvalidColumn(String),

    /// Raised by the in-memory store's fault plan.
    #[error("Injected fault: {0}")]
    Injected(String),
}

impl StoreError {
    /// Whether retrying the same work in a new transaction may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Injected(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Tls(_) => StoreError::Connection(e.to_string()),
            sqlx::Error::Configuration(_) => StoreError::Configuration(e.to_string()),
            sqlx::Error::Database(db)
                if db.is_unique_violation()
                    || db.is_foreign_key_violation()
                    || db.is_check_violation() =>
            {
                StoreError::Constraint(e.to_string())
            }
            _ => StoreError::Query(e.to_string()),
        }
    }
}
