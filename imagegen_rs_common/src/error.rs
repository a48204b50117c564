use thiserror::Error;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Failures of a session operation.
///
/// Every variant is terminal to the current operation only. The session stays usable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// User input violates a precondition of the operation.
    #[error("{0}")]
    Config(String),

    /// The inference engine failed during initialize or generate.
    #[error("{0}")]
    Capability(String),

    /// Generation was requested before the engine was initialized.
    #[error("image generator is not initialized")]
    NotInitialized,

    /// Another initialize or generate is still in flight.
    #[error("another operation is already in flight")]
    Busy,

    /// The background worker is no longer running.
    #[error("session worker has shut down")]
    WorkerGone,
}

impl SessionError {
    pub fn config<S: ToString>(msg: S) -> Self {
        Self::Config(msg.to_string())
    }

    /// Wrap an engine error, keeping its whole context chain.
    pub fn capability(err: &anyhow::Error) -> Self {
        Self::Capability(format!("{err:#}"))
    }
}
