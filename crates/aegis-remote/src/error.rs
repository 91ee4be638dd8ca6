use thiserror::Error;

/// Errors produced when talking to the hosted backend.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Transport-level failure (connection refused, timeout, TLS, decode).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("Backend error ({status}): {message}")]
    Api { status: u16, message: String },

    /// An operation that needs an active session found none.
    #[error("No active session")]
    NoSession,

    /// The requested record does not exist.
    #[error("Record not found")]
    NotFound,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RemoteError>;
