//! Error taxonomy shared by every user-facing operation.
//!
//! Nothing here is fatal: the orchestrator turns each variant into a status
//! message and keeps going.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PopupError {
    /// Input rejected before any network call was made.
    #[error("{0}")]
    Validation(String),

    /// The service rejected the API key.
    #[error("Authorization failed: {0}")]
    Auth(String),

    /// The service answered with a non-success status.
    #[error("{0}")]
    Api(String),

    /// No response was received at all.
    #[error("Network error: {0}")]
    Transport(String),

    /// Page text could not be read; callers continue without it.
    #[error("Cannot access page content: {0}")]
    ContentAccess(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PopupError {
    /// Errors coming back from the remote service, as opposed to local ones.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            PopupError::Auth(_) | PopupError::Api(_) | PopupError::Transport(_)
        )
    }
}

impl From<reqwest::Error> for PopupError {
    fn from(err: reqwest::Error) -> Self {
        PopupError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for PopupError {
    fn from(err: serde_json::Error) -> Self {
        PopupError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for PopupError {
    fn from(err: std::io::Error) -> Self {
        PopupError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PopupError>;
