//! Encoder failure capture and classification.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

/// Structured cause inferred from encoder diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    MissingInput,
    DecoderError,
    DiskFull,
    EncoderUnavailable,
    PermissionDenied,
    InvalidFilterGraph,
    /// Terminated by a signal or an abnormal exit code
    Crashed,
    /// Nothing recognizable in the output
    Opaque,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::MissingInput => "missing_input",
            FailureReason::DecoderError => "decoder_error",
            FailureReason::DiskFull => "disk_full",
            FailureReason::EncoderUnavailable => "encoder_unavailable",
            FailureReason::PermissionDenied => "permission_denied",
            FailureReason::InvalidFilterGraph => "invalid_filter_graph",
            FailureReason::Crashed => "crashed",
            FailureReason::Opaque => "opaque",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Checked in order; the first match wins.
static PATTERNS: LazyLock<Vec<(Regex, FailureReason)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)no space left on device|disk quota exceeded").unwrap(),
            FailureReason::DiskFull,
        ),
        (
            Regex::new(r"(?i)permission denied|operation not permitted|read-only file system").unwrap(),
            FailureReason::PermissionDenied,
        ),
        (
            Regex::new(r"(?i)no such file or directory|does not exist").unwrap(),
            FailureReason::MissingInput,
        ),
        (
            Regex::new(r"(?i)unknown encoder|encoder .* not found|error while opening encoder|codec not currently supported").unwrap(),
            FailureReason::EncoderUnavailable,
        ),
        (
            Regex::new(r"(?i)error (?:initializing|reinitializing|configuring) (?:complex )?filter|no such filter|invalid (?:stream )?specifier|filtergraph|error parsing (?:a )?filter|cannot find a matching stream|option .* not found").unwrap(),
            FailureReason::InvalidFilterGraph,
        ),
        (
            Regex::new(r"(?i)invalid data found when processing input|moov atom not found|error while decoding|corrupt|decoding error").unwrap(),
            FailureReason::DecoderError,
        ),
    ]
});

/// Infer a failure reason from captured streams and the exit status.
///
/// `exit_code` is `None` when the process was terminated by a signal.
pub fn classify(stderr: &str, exit_code: Option<i32>) -> FailureReason {
    if let Some(reason) = PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(stderr))
        .map(|(_, reason)| *reason)
    {
        return reason;
    }

    match exit_code {
        None => FailureReason::Crashed,
        // Shells report signal deaths as 128 + signo
        Some(code) if code < 0 || code > 128 => FailureReason::Crashed,
        _ => FailureReason::Opaque,
    }
}

/// Everything captured from a failed encoder run.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessFailure {
    /// Full command line as executed
    pub command: String,
    pub stderr: String,
    pub stdout: String,
    pub exit_code: Option<i32>,
    pub reason: FailureReason,
    /// Text rendering of the recipe the encoder was given
    pub recipe: String,
}

impl ProcessFailure {
    /// Build a failure record, classifying the diagnostics.
    pub fn new(
        command: impl Into<String>,
        stderr: impl Into<String>,
        stdout: impl Into<String>,
        exit_code: Option<i32>,
        recipe: impl Into<String>,
    ) -> Self {
        let stderr = stderr.into();
        let reason = classify(&stderr, exit_code);
        Self {
            command: command.into(),
            stderr,
            stdout: stdout.into(),
            exit_code,
            reason,
            recipe: recipe.into(),
        }
    }

    /// Override the classified reason.
    pub fn with_reason(mut self, reason: FailureReason) -> Self {
        self.reason = reason;
        self
    }

    /// Last non-empty stderr line, usually the most specific message.
    pub fn last_stderr_line(&self) -> Option<&str> {
        self.stderr.lines().rev().map(str::trim).find(|l| !l.is_empty())
    }
}

impl fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "{} (exit code {})", self.reason, code)?,
            None => write!(f, "{} (terminated by signal)", self.reason)?,
        }
        if let Some(line) = self.last_stderr_line() {
            write!(f, ": {}", line)?;
        }
        Ok(())
    }
}
