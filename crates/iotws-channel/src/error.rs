//! Driver error types.

use thiserror::Error;

/// Errors raised by the driver and its collaborators.
///
/// `Clone` so a single failure can be fanned out to every error observer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IotError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("credential error: {0}")]
    Credentials(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("subscribe error: {0}")]
    Subscribe(String),

    #[error("driver has been disposed")]
    Disposed,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl IotError {
    /// Transport-level failures are reconnect triggers, not fatal errors.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            IotError::Connection(_) | IotError::Publish(_) | IotError::Subscribe(_)
        )
    }
}

impl From<std::io::Error> for IotError {
    fn from(e: std::io::Error) -> Self {
        IotError::Io(e.to_string())
    }
}

/// Convenience alias for driver results.
pub type IotResult<T> = Result<T, IotError>;
