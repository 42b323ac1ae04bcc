//! Pipeline metrics.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding binary installs a recorder.

use metrics::{counter, histogram};

// =============================================================================
// Metric Names
// =============================================================================

/// Metric name constants for consistency.
pub mod names {
    /// Encode jobs by terminal outcome.
    pub const ENCODE_JOBS_TOTAL: &str = "eyetest_encode_jobs_total";

    /// Wall-clock encoder run time in seconds by outcome.
    pub const ENCODE_DURATION_SECONDS: &str = "eyetest_encode_duration_seconds";

    /// Encoder failures by classified reason.
    pub const ENCODE_FAILURES_TOTAL: &str = "eyetest_encode_failures_total";

    /// Edge overlay frames written.
    pub const OVERLAY_FRAMES_TOTAL: &str = "eyetest_overlay_frames_total";
}

// =============================================================================
// Recording Functions
// =============================================================================

/// Record a finished encode job.
pub fn record_encode(outcome: &str, duration_secs: f64) {
    counter!(names::ENCODE_JOBS_TOTAL, "outcome" => outcome.to_string()).increment(1);
    histogram!(names::ENCODE_DURATION_SECONDS, "outcome" => outcome.to_string())
        .record(duration_secs);
}

/// Record an encoder failure reason.
pub fn record_failure(reason: &str) {
    counter!(names::ENCODE_FAILURES_TOTAL, "reason" => reason.to_string()).increment(1);
}

/// Record overlay frames produced by one pass.
pub fn record_overlay_frames(frames: u64) {
    counter!(names::OVERLAY_FRAMES_TOTAL).increment(frames);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert!(names::ENCODE_JOBS_TOTAL.starts_with("eyetest_"));
        assert!(names::ENCODE_DURATION_SECONDS.ends_with("_seconds"));
        assert!(names::OVERLAY_FRAMES_TOTAL.contains("overlay"));
    }
}
