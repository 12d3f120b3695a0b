use std::fmt;

use thiserror::Error;

/// Top-level error type for the circulars front end.
///
/// The first four variants are the failure categories a caller is expected
/// to branch on. The remaining ones are ambient failures (config files,
/// malformed payloads) that surface through the same `?` chain.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CircularsError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Coarse failure category, used by callers that only need to decide how
/// to degrade (retry prompt, "not found" page, disabled chat).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Transport,
    Timeout,
    Validation,
    Local,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Transport => write!(f, "transport"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Validation => write!(f, "validation"),
            ErrorKind::Local => write!(f, "local"),
        }
    }
}

impl CircularsError {
    /// Category of this error.
    ///
    /// A body that fails to decode came off the wire, so it is reported as
    /// a transport failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CircularsError::NotFound(_) => ErrorKind::NotFound,
            CircularsError::Transport(_) | CircularsError::Serialization(_) => {
                ErrorKind::Transport
            }
            CircularsError::Timeout(_) => ErrorKind::Timeout,
            CircularsError::Validation(_) => ErrorKind::Validation,
            CircularsError::Config(_) | CircularsError::Io(_) => ErrorKind::Local,
        }
    }

    /// Whether the failed call may succeed if simply repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Timeout)
    }
}

impl From<toml::de::Error> for CircularsError {
    fn from(err: toml::de::Error) -> Self {
        CircularsError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for CircularsError {
    fn from(err: toml::ser::Error) -> Self {
        CircularsError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for CircularsError {
    fn from(err: serde_json::Error) -> Self {
        CircularsError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for circulars operations.
pub type Result<T> = std::result::Result<T, CircularsError>;
