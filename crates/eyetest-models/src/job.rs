//! Encode job identity and lifecycle.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an encode job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of one encoder run.
///
/// `Pending -> Running -> {Succeeded, Failed, Cancelled}`; the last three
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum EncodeState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl EncodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncodeState::Pending => "pending",
            EncodeState::Running => "running",
            EncodeState::Succeeded => "succeeded",
            EncodeState::Failed => "failed",
            EncodeState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EncodeState::Succeeded | EncodeState::Failed | EncodeState::Cancelled
        )
    }

    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(&self, next: EncodeState) -> bool {
        match (self, next) {
            (EncodeState::Pending, EncodeState::Running) => true,
            // Validation or spawn failures never reach Running
            (EncodeState::Pending, EncodeState::Failed | EncodeState::Cancelled) => true,
            (EncodeState::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for EncodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
