//! Worker error types.

use thiserror::Error;

use eyetest_media::MediaError;
use eyetest_models::{ConfigError, RegionError};

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid settings: {0}")]
    Settings(#[from] ConfigError),

    #[error("Invalid region: {0}")]
    Region(#[from] RegionError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Settings file error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether the job ended because it was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkerError::Media(e) if e.is_cancelled())
    }

    /// Media error underneath, if any.
    pub fn media(&self) -> Option<&MediaError> {
        match self {
            WorkerError::Media(e) => Some(e),
            _ => None,
        }
    }
}
