use thiserror::Error;

use crate::job::JobState;

#[derive(Error, Debug)]
pub enum TimelapseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// User input outside the offered choices.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Request rejected before any job starts.
    #[error("Invalid conversion request: {0}")]
    Precondition(String),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid job state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("Conversion cancelled")]
    Cancelled,
}

impl TimelapseError {
    /// Whether the error rejects a whole request rather than a single file.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_) | Self::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, TimelapseError>;
