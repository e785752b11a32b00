//! Error handling for the facegate daemon

use crate::recognition::RecognitionError;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Config error (missing or malformed environment value)
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Recognition failure escalated out of the main loop
    #[error("Recognition error: {0}")]
    Recognition(#[from] RecognitionError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the orchestrator must shut the daemon down on this error
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Recognition(e) => !e.is_no_face(),
            Error::Config(_) | Error::Internal(_) => true,
            Error::Serialization(_) | Error::Http(_) | Error::Io(_) => false,
        }
    }
}
