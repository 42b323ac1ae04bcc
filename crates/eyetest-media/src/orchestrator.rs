//! Encode orchestration.
//!
//! An [`EncodeOrchestrator`] runs at most one encode at a time. Each job
//! moves through `Pending -> Running -> {Succeeded, Failed, Cancelled}`:
//!
//! - the recipe is rendered into a `-filter_complex` graph, with the edge
//!   overlay and the logo as extra inputs;
//! - FFmpeg writes into the job's scratch directory and the result is only
//!   moved to its destination after it passed the integrity check;
//! - cancellation sends SIGTERM, waits the grace period, then kills, and
//!   wins over any failure that arrives at the same time;
//! - the scratch directory is removed on every terminal state, except for
//!   failures when diagnostic retention is enabled.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use eyetest_models::encoding::OUTPUT_EXTENSION;
use eyetest_models::{EncodeState, EncodingConfig, JobId};

use crate::command::{FfmpegCommand, FfmpegRunner, RunOutput};
use crate::diagnostics::ProcessFailure;
use crate::error::{MediaError, MediaResult};
use crate::filters::{render_graph, GraphInputs};
use crate::fs_utils::move_file;
use crate::metrics;
use crate::overlay::OverlayArtifact;
use crate::progress::ProgressTracker;
use crate::recipe::TransformRecipe;
use crate::scratch::ScratchDir;

/// Result of one encode job.
pub type EncodeResult = Result<EncodeSuccess, MediaError>;

/// A successfully encoded output.
#[derive(Debug, Clone)]
pub struct EncodeSuccess {
    pub job_id: JobId,
    /// Final location of the output
    pub output: PathBuf,
    pub size_bytes: u64,
    pub elapsed: Duration,
}

/// Everything one encoder run needs.
#[derive(Debug)]
pub struct EncodeJob {
    pub id: JobId,
    /// Source video
    pub source: PathBuf,
    /// Overlay mask; required when the recipe composites one
    pub overlay: Option<OverlayArtifact>,
    /// Frozen recipe snapshot
    pub recipe: Arc<TransformRecipe>,
    pub encoding: EncodingConfig,
    pub has_audio: bool,
    /// Source duration, used to turn output time into a progress fraction
    pub source_duration_secs: f64,
    /// Where the finished output is moved
    pub destination: PathBuf,
    /// Job-scoped scratch space; the overlay artifact lives here too
    pub scratch: ScratchDir,
}

impl EncodeJob {
    /// Expected output duration in milliseconds after trim and re-timing.
    pub fn expected_output_ms(&self) -> i64 {
        let remaining = (self.source_duration_secs - self.recipe.trim_start_secs()).max(0.0);
        (remaining / self.recipe.speed().max(f64::EPSILON) * 1000.0).round() as i64
    }

    /// Assemble the FFmpeg command writing to `output`.
    pub fn command(&self, ffmpeg: &Path, output: &Path) -> MediaResult<FfmpegCommand> {
        let inputs = GraphInputs::for_recipe(&self.recipe, self.has_audio, self.encoding.mute_audio);
        let graph = render_graph(&self.recipe, &inputs)?;

        let mut cmd = FfmpegCommand::new(ffmpeg, output).input(&self.source);
        if inputs.overlay.is_some() {
            let artifact = self.overlay.as_ref().ok_or_else(|| {
                MediaError::InvalidRecipe("recipe composites an edge overlay but none was generated".into())
            })?;
            cmd = cmd.input_with_args(artifact.input_args(), &artifact.path);
        }
        if let Some(logo) = self.recipe.logo() {
            cmd = cmd.input(logo);
        }

        cmd = cmd
            .filter_complex(graph.filter_complex)
            .map(&graph.video_label)
            .video_codec(self.encoding.codec.clone())
            .output_args(self.encoding.quality_args());

        cmd = match &graph.audio_label {
            Some(label) => cmd
                .map(label)
                .audio_codec(self.encoding.audio_codec.clone())
                .audio_bitrate(self.encoding.audio_bitrate.clone()),
            None => cmd.output_arg("-an"),
        };

        Ok(cmd.faststart())
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Time between SIGTERM and a hard kill on cancellation
    pub cancel_grace: Duration,
    /// Upper bound for one encoder run
    pub timeout_secs: Option<u64>,
    /// Keep the scratch directory of failed jobs
    pub retain_failed: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            cancel_grace: Duration::from_secs(5),
            timeout_secs: None,
            retain_failed: false,
        }
    }
}

/// Exclusive right to run one job; released on drop.
#[derive(Debug)]
pub struct JobSlot {
    busy: Arc<AtomicBool>,
}

impl Drop for JobSlot {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

/// Requests cancellation of a running job.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Handle to a job started with [`EncodeOrchestrator::spawn`].
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    cancel: CancelHandle,
    progress: watch::Receiver<f64>,
    state: watch::Receiver<EncodeState>,
    task: JoinHandle<EncodeResult>,
}

impl JobHandle {
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Request cancellation; the job ends as `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Progress fraction in 0.0..=1.0, never decreasing.
    pub fn progress(&self) -> watch::Receiver<f64> {
        self.progress.clone()
    }

    pub fn state(&self) -> watch::Receiver<EncodeState> {
        self.state.clone()
    }

    /// Wait for the terminal result.
    pub async fn wait(self) -> EncodeResult {
        self.task
            .await
            .map_err(|e| MediaError::internal(format!("encode task failed: {}", e)))?
    }
}

/// Drives FFmpeg for one job at a time.
#[derive(Debug, Clone)]
pub struct EncodeOrchestrator {
    ffmpeg: PathBuf,
    options: OrchestratorOptions,
    busy: Arc<AtomicBool>,
}

impl EncodeOrchestrator {
    pub fn new(ffmpeg: impl Into<PathBuf>, options: OrchestratorOptions) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            options,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claim the single job slot, failing if a job is active.
    pub fn try_reserve(&self) -> MediaResult<JobSlot> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| MediaError::JobAlreadyRunning)?;
        Ok(JobSlot {
            busy: self.busy.clone(),
        })
    }

    /// Start `job` in the background on a reserved slot.
    pub fn spawn(&self, slot: JobSlot, job: EncodeJob) -> JobHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (progress_tx, progress_rx) = watch::channel(0.0f64);
        let (state_tx, state_rx) = watch::channel(EncodeState::Pending);
        let id = job.id.clone();

        let ctx = RunContext {
            ffmpeg: self.ffmpeg.clone(),
            options: self.options.clone(),
            cancel_rx,
            progress_tx: Arc::new(progress_tx),
            state_tx,
        };
        let task = tokio::spawn(async move {
            let result = ctx.execute(job).await;
            drop(slot);
            result
        });

        JobHandle {
            id,
            cancel: CancelHandle {
                tx: Arc::new(cancel_tx),
            },
            progress: progress_rx,
            state: state_rx,
            task,
        }
    }

    /// Run `job` to completion.
    ///
    /// Rejected with [`MediaError::JobAlreadyRunning`] while another job is active.
    pub async fn run(&self, job: EncodeJob) -> EncodeResult {
        let slot = self.try_reserve()?;
        self.spawn(slot, job).wait().await
    }
}

struct RunContext {
    ffmpeg: PathBuf,
    options: OrchestratorOptions,
    cancel_rx: watch::Receiver<bool>,
    progress_tx: Arc<watch::Sender<f64>>,
    state_tx: watch::Sender<EncodeState>,
}

impl RunContext {
    fn transition(&self, next: EncodeState) {
        let current = *self.state_tx.borrow();
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "Unexpected encode state transition");
        }
        self.state_tx.send_replace(next);
    }

    fn cancel_requested(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    async fn execute(self, job: EncodeJob) -> EncodeResult {
        let started = Instant::now();
        let job_id = job.id.clone();
        info!(job_id = %job_id, source = %job.source.display(), "Encode job pending");

        let result = self.encode(&job).await;
        let result = prefer_cancellation(&job_id, result, self.cancel_requested());

        let elapsed = started.elapsed();
        let scratch = job.scratch;
        match &result {
            Ok(success) => {
                self.progress_tx.send_replace(1.0);
                self.transition(EncodeState::Succeeded);
                info!(
                    job_id = %job_id,
                    output = %success.output.display(),
                    size_bytes = success.size_bytes,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Encode job succeeded"
                );
                if let Err(e) = scratch.cleanup() {
                    warn!(job_id = %job_id, "Scratch cleanup failed: {}", e);
                }
            }
            Err(e) if e.is_cancelled() => {
                self.transition(EncodeState::Cancelled);
                info!(job_id = %job_id, "Encode job cancelled");
                if let Err(e) = scratch.cleanup() {
                    warn!(job_id = %job_id, "Scratch cleanup failed: {}", e);
                }
            }
            Err(e) => {
                self.transition(EncodeState::Failed);
                if let Some(failure) = e.process_failure() {
                    metrics::record_failure(failure.reason.as_str());
                    error!(
                        job_id = %job_id,
                        reason = %failure.reason,
                        exit_code = ?failure.exit_code,
                        command = %failure.command,
                        "Encode job failed: {}",
                        failure
                    );
                } else {
                    error!(job_id = %job_id, kind = e.kind(), "Encode job failed: {}", e);
                }
                if self.options.retain_failed {
                    scratch.retain();
                } else if let Err(e) = scratch.cleanup() {
                    warn!(job_id = %job_id, "Scratch cleanup failed: {}", e);
                }
            }
        }

        let outcome = match &result {
            Ok(_) => EncodeState::Succeeded,
            Err(e) => e.terminal_state(),
        };
        metrics::record_encode(outcome.as_str(), elapsed.as_secs_f64());

        result.map(|mut success| {
            success.elapsed = elapsed;
            success
        })
    }

    async fn encode(&self, job: &EncodeJob) -> EncodeResult {
        if self.cancel_requested() {
            return Err(MediaError::Cancelled);
        }

        let scratch_output = job
            .scratch
            .file(&format!("output.{}", OUTPUT_EXTENSION));
        let cmd = job.command(&self.ffmpeg, &scratch_output)?;
        let recipe_text = job.recipe.to_string();
        debug!(job_id = %job.id, recipe = %recipe_text, "Encoding with recipe");

        let mut runner = FfmpegRunner::new()
            .with_cancel(self.cancel_rx.clone())
            .with_grace(self.options.cancel_grace);
        if let Some(secs) = self.options.timeout_secs {
            runner = runner.with_timeout(secs);
        }

        let mut tracker = ProgressTracker::new(job.expected_output_ms());
        let progress_tx = self.progress_tx.clone();
        let output = runner
            .run_observed(
                &cmd,
                || {
                    self.transition(EncodeState::Running);
                    info!(job_id = %job.id, command = %cmd.display(), "Encoder started");
                },
                move |progress| {
                    if let Some(fraction) = tracker.update(&progress) {
                        progress_tx.send_replace(fraction);
                    }
                },
            )
            .await?;

        let failure = |output: &RunOutput| {
            ProcessFailure::new(
                cmd.display(),
                output.stderr.clone(),
                output.stdout.clone(),
                output.exit_code,
                recipe_text.clone(),
            )
        };

        if output.cancelled || self.cancel_requested() {
            return Err(MediaError::Cancelled);
        }
        if output.timed_out {
            let secs = self.options.timeout_secs.unwrap_or_default();
            warn!(job_id = %job.id, timeout_secs = secs, "Encoder timed out");
            return Err(MediaError::Timeout {
                secs,
                failure: Box::new(failure(&output)),
            });
        }
        if !output.success {
            return Err(MediaError::ProcessRuntime(Box::new(failure(&output))));
        }

        let size_bytes = match tokio::fs::metadata(&scratch_output).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => meta.len(),
            Ok(_) | Err(_) => {
                return Err(MediaError::OutputIntegrity(Box::new(failure(&output))));
            }
        };

        move_file(&scratch_output, &job.destination).await?;

        Ok(EncodeSuccess {
            job_id: job.id.clone(),
            output: job.destination.clone(),
            size_bytes,
            elapsed: Duration::ZERO,
        })
    }
}

/// A cancellation request outranks any failure that raced with it.
fn prefer_cancellation(
    job_id: &JobId,
    result: EncodeResult,
    cancel_requested: bool,
) -> EncodeResult {
    match result {
        Err(e) if !e.is_cancelled() && cancel_requested => {
            debug!(job_id = %job_id, "Failure superseded by cancellation: {}", e);
            Err(MediaError::Cancelled)
        }
        other => other,
    }
}
