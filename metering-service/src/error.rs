//! Application error type.

use thiserror::Error;

/// Service-wide error taxonomy. Insufficient funds is deliberately absent:
/// it is an expected business outcome carried in `CycleOutcome`, never an
/// error. `DatabaseError` covers transient store failures (connection loss,
/// lock/statement timeout); the scheduler retries those on its next tick.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Not found: {0}")]
    NotFound(anyhow::Error),

    #[error("Conflict: {0}")]
    Conflict(anyhow::Error),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}
