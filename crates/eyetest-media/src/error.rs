//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

use eyetest_models::{ConfigError, EncodeState, RegionError};

use crate::diagnostics::ProcessFailure;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Invalid configuration: {0}")]
    ConfigValidation(#[from] ConfigError),

    #[error("Invalid region: {0}")]
    InvalidRegion(#[from] RegionError),

    #[error("Invalid transform recipe: {0}")]
    InvalidRecipe(String),

    #[error("Failed to decode frame {frame_index}: {message}")]
    Decode { frame_index: u64, message: String },

    #[error("FFmpeg not found (checked configured path, PATH and known install locations)")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("Failed to launch {program}: {message}")]
    ProcessSpawn { program: String, message: String },

    #[error("Encoder failed: {0}")]
    ProcessRuntime(Box<ProcessFailure>),

    #[error("Encoder reported success but output is unusable: {0}")]
    OutputIntegrity(Box<ProcessFailure>),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("An encode job is already running")]
    JobAlreadyRunning,

    #[error("Encoder timed out after {secs} seconds: {failure}")]
    Timeout {
        secs: u64,
        failure: Box<ProcessFailure>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    /// Create a frame decode failure.
    pub fn decode(frame_index: u64, message: impl Into<String>) -> Self {
        Self::Decode {
            frame_index,
            message: message.into(),
        }
    }

    /// Create a process spawn failure.
    pub fn spawn_failed(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProcessSpawn {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this is a user-initiated cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Terminal job state this error corresponds to.
    pub fn terminal_state(&self) -> EncodeState {
        if self.is_cancelled() {
            EncodeState::Cancelled
        } else {
            EncodeState::Failed
        }
    }

    /// Captured encoder diagnostics, if the error carries any.
    pub fn process_failure(&self) -> Option<&ProcessFailure> {
        match self {
            Self::ProcessRuntime(failure)
            | Self::OutputIntegrity(failure)
            | Self::Timeout { failure, .. } => Some(failure),
            _ => None,
        }
    }

    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigValidation(_) | Self::InvalidRegion(_) | Self::InvalidRecipe(_) => {
                "config_validation"
            }
            Self::Decode { .. } => "decode",
            Self::FfmpegNotFound | Self::FfprobeNotFound | Self::ProcessSpawn { .. } => {
                "process_spawn"
            }
            Self::ProcessRuntime(_) => "process_runtime",
            Self::OutputIntegrity(_) => "output_integrity",
            Self::Cancelled => "cancelled",
            Self::JobAlreadyRunning => "job_already_running",
            Self::Timeout { .. } => "timeout",
            Self::FfprobeFailed { .. } | Self::FileNotFound(_) | Self::InvalidVideo(_) => "probe",
            Self::ResourceLimit(_) => "resource_limit",
            Self::Io(_) | Self::JsonParse(_) | Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_maps_to_cancelled_state() {
        assert_eq!(MediaError::Cancelled.terminal_state(), EncodeState::Cancelled);
        assert_eq!(
            MediaError::decode(3, "truncated").terminal_state(),
            EncodeState::Failed
        );
    }

    #[test]
    fn test_timeout_keeps_process_failure() {
        let err = MediaError::Timeout {
            secs: 600,
            failure: Box::new(ProcessFailure::new(
                "ffmpeg -i in.mp4 out.mp4",
                "stalled",
                "",
                None,
                "1. timing speed=1.12",
            )),
        };
        assert_eq!(err.kind(), "timeout");
        assert_eq!(err.terminal_state(), EncodeState::Failed);
        let failure = err.process_failure().unwrap();
        assert_eq!(failure.recipe, "1. timing speed=1.12");
        assert!(err.to_string().contains("600 seconds"));
    }

    #[test]
    fn test_config_error_converts() {
        let err: MediaError = ConfigError::UnknownPreset("SEPIA".into()).into();
        assert_eq!(err.kind(), "config_validation");
        assert!(err.to_string().contains("SEPIA"));
    }
}
