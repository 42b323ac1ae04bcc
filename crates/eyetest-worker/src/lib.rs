//! Eye Test pipeline runner.
//!
//! This crate provides:
//! - Worker configuration from `EYETEST_*` environment variables
//! - The end-to-end job pipeline (probe, recipe, overlay, encode)
//! - Command line parsing for the `eyetest` binary
//! - Structured job logging

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use logging::JobLogger;
pub use pipeline::{JobPlan, JobReport, Pipeline, ProcessRequest};
