//! Structured job logging utilities.
//!
//! Provides consistent, structured logging for job processing with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};

use eyetest_models::JobId;

/// Job logger for structured logging with consistent formatting.
///
/// Every line carries the job ID and the pipeline step it belongs to
/// (e.g. "overlay", "encode").
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    step: String,
}

impl JobLogger {
    pub fn new(job_id: &JobId, step: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            step: step.to_string(),
        }
    }

    /// Same job, different step.
    pub fn step(&self, step: &str) -> Self {
        Self {
            job_id: self.job_id.clone(),
            step: step.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(job_id = %self.job_id, step = %self.step, "Step started: {}", message);
    }

    /// Log a progress fraction in 0.0..=1.0.
    pub fn log_progress(&self, fraction: f64) {
        info!(
            job_id = %self.job_id,
            step = %self.step,
            percent = format!("{:.1}", fraction * 100.0),
            "Step progress"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(job_id = %self.job_id, step = %self.step, "Step warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(job_id = %self.job_id, step = %self.step, "Step failed: {}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(job_id = %self.job_id, step = %self.step, "Step completed: {}", message);
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn step_name(&self) -> &str {
        &self.step
    }

    /// Create a tracing span for this job step.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("job", job_id = %self.job_id, step = %self.step)
    }
}
