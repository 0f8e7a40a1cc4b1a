//! Error types for the Proofly client.

use thiserror::Error;

/// Result type alias using Proofly's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Proofly client operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input reached the core (never retried)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network/transport failure talking to the remote service
    #[error("Transport error: {0}")]
    Transport(String),

    /// Remote service asked us to slow down
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Remote service answered with a non-success status
    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    /// Remote job reached a terminal failure
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// Polling exceeded its elapsed-time budget
    #[error("Job timed out: {0}")]
    JobTimedOut(String),

    /// Caller cancelled the operation
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Every lookup of a graph build failed
    #[error("All lookups failed: {0}")]
    AllLookupsFailed(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failure is worth retrying with backoff.
    ///
    /// Transport failures, rate limiting and 5xx responses are transient;
    /// everything else is surfaced immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport(_) | Error::RateLimited(_) => true,
            Error::Remote { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if status.as_u16() == 429 => Error::RateLimited(e.to_string()),
            Some(status) => Error::Remote {
                status: status.as_u16(),
                message: e.to_string(),
            },
            None if e.is_decode() => Error::Serialization(e.to_string()),
            None => Error::Transport(e.to_string()),
        }
    }
}
