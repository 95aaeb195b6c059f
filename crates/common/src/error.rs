//! Error types shared across Greenroom crates.

use std::path::PathBuf;

/// Top-level error type for Greenroom operations.
#[derive(Debug, thiserror::Error)]
pub enum GreenroomError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Scenario error: {message}")]
    Scenario { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using GreenroomError.
pub type GreenroomResult<T> = Result<T, GreenroomError>;

impl GreenroomError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn scenario(msg: impl Into<String>) -> Self {
        Self::Scenario {
            message: msg.into(),
        }
    }
}
