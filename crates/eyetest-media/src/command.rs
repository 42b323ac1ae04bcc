//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use eyetest_models::encoding::{DEFAULT_VIDEO_CODEC, FALLBACK_VIDEO_CODEC};

use crate::error::{MediaError, MediaResult};
use crate::progress::{FfmpegProgress, ProgressParser};

/// Install locations checked when FFmpeg is not on PATH.
const KNOWN_FFMPEG_PATHS: &[&str] = &[
    "/usr/bin/ffmpeg",
    "/usr/local/bin/ffmpeg",
    "/opt/homebrew/bin/ffmpeg",
    "/opt/local/bin/ffmpeg",
    "/snap/bin/ffmpeg",
];

/// Diagnostic stderr lines kept per run.
const STDERR_TAIL_LINES: usize = 500;

/// Cap on captured stdout.
const STDOUT_LIMIT_BYTES: usize = 64 * 1024;

/// One `-i` input with its own input options.
#[derive(Debug, Clone)]
struct FfmpegInput {
    args: Vec<String>,
    path: PathBuf,
}

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// FFmpeg binary
    program: PathBuf,
    /// Inputs in stream-index order
    inputs: Vec<FfmpegInput>,
    /// Output file path
    output: PathBuf,
    /// Output arguments (after the inputs)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command writing to `output`.
    pub fn new(program: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add an input with no input options.
    pub fn input(self, path: impl AsRef<Path>) -> Self {
        self.input_with_args(Vec::<String>::new(), path)
    }

    /// Add an input preceded by its input options.
    pub fn input_with_args<I, S>(mut self, args: I, path: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push(FfmpegInput {
            args: args.into_iter().map(Into::into).collect(),
            path: path.as_ref().to_path_buf(),
        });
        self
    }

    /// Number of inputs added so far.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Add output arguments.
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set filter complex.
    pub fn filter_complex(self, filter: impl Into<String>) -> Self {
        self.output_arg("-filter_complex").output_arg(filter)
    }

    /// Map a labelled graph output (or a stream specifier).
    pub fn map(self, label: impl AsRef<str>) -> Self {
        let label = label.as_ref();
        let spec = if label.contains(':') {
            label.to_string()
        } else {
            format!("[{}]", label)
        };
        self.output_arg("-map").output_arg(spec)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set audio bitrate.
    pub fn audio_bitrate(self, bitrate: impl Into<String>) -> Self {
        self.output_arg("-b:a").output_arg(bitrate)
    }

    /// Move the index to the front of the file for progressive playback.
    pub fn faststart(self) -> Self {
        self.output_arg("-movflags").output_arg("+faststart")
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }
        args.push("-hide_banner".to_string());
        args.push("-nostdin".to_string());

        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());
        args.push("-nostats".to_string());

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.path.to_string_lossy().to_string());
        }

        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());

        args
    }

    /// Full command line, shell-quoted where needed.
    pub fn display(&self) -> String {
        std::iter::once(self.program.to_string_lossy().to_string())
            .chain(self.build_args())
            .map(|arg| shell_quote(&arg))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=+,@%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Everything captured from one finished FFmpeg run.
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    /// `None` when the process died from a signal
    pub exit_code: Option<i32>,
    pub success: bool,
    /// Diagnostic stderr lines (progress lines removed)
    pub stderr: String,
    pub stdout: String,
    /// The run was stopped because cancellation was requested
    pub cancelled: bool,
    /// The run was stopped by the timeout
    pub timed_out: bool,
}

/// Runner for FFmpeg commands with progress tracking and cancellation.
pub struct FfmpegRunner {
    /// Cancellation signal receiver
    cancel_rx: Option<watch::Receiver<bool>>,
    /// Time allowed between SIGTERM and kill
    grace: Duration,
    /// Timeout in seconds
    timeout_secs: Option<u64>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Create a new runner.
    pub fn new() -> Self {
        Self {
            cancel_rx: None,
            grace: Duration::from_secs(5),
            timeout_secs: None,
        }
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set the grace period between SIGTERM and a hard kill.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<RunOutput> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command with progress callback.
    pub async fn run_with_progress<F>(
        &self,
        cmd: &FfmpegCommand,
        progress_callback: F,
    ) -> MediaResult<RunOutput>
    where
        F: FnMut(FfmpegProgress) + Send + 'static,
    {
        self.run_observed(cmd, || {}, progress_callback).await
    }

    /// Run an FFmpeg command, calling `on_spawn` once the process is running.
    ///
    /// Only spawn failures are errors; how the process ended is reported
    /// in the returned [`RunOutput`]. `on_spawn` is not called when the
    /// process never starts.
    pub async fn run_observed<S, F>(
        &self,
        cmd: &FfmpegCommand,
        on_spawn: S,
        mut progress_callback: F,
    ) -> MediaResult<RunOutput>
    where
        S: FnOnce(),
        F: FnMut(FfmpegProgress) + Send + 'static,
    {
        if self.is_cancelled() {
            return Ok(RunOutput {
                cancelled: true,
                ..Default::default()
            });
        }

        let args = cmd.build_args();
        debug!("Running FFmpeg: {}", cmd.display());

        let mut child = Command::new(cmd.program())
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::spawn_failed(cmd.program().display().to_string(), e.to_string()))?;
        on_spawn();

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("stderr not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("stdout not captured"))?;

        // Split stderr into progress blocks and diagnostics
        let stderr_handle = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            let mut parser = ProgressParser::new();
            let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

            while let Ok(Some(line)) = reader.next_line().await {
                if ProgressParser::is_progress_line(&line) {
                    if let Some(progress) = parser.feed(&line) {
                        progress_callback(progress);
                    }
                } else if !line.trim().is_empty() {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        // Keep draining past the cap so the child never blocks on a full pipe
        let stdout_handle = tokio::spawn(async move {
            let mut stdout = stdout;
            let mut buf = Vec::new();
            let mut chunk = [0u8; 8192];
            while let Ok(n) = stdout.read(&mut chunk).await {
                if n == 0 {
                    break;
                }
                let room = STDOUT_LIMIT_BYTES.saturating_sub(buf.len());
                buf.extend_from_slice(&chunk[..n.min(room)]);
            }
            String::from_utf8_lossy(&buf).into_owned()
        });

        let (exit_code, success, cancelled, timed_out) = self.wait_for_completion(&mut child).await?;

        // Readers finish once the pipes close; bound the wait in case a
        // grandchild still holds them open.
        let stderr = join_reader(stderr_handle, self.grace).await;
        let stdout = join_reader(stdout_handle, self.grace).await;

        Ok(RunOutput {
            exit_code,
            success,
            stderr,
            stdout,
            cancelled,
            timed_out,
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Wait for child process with cancellation and timeout.
    async fn wait_for_completion(
        &self,
        child: &mut Child,
    ) -> MediaResult<(Option<i32>, bool, bool, bool)> {
        let timeout = async {
            match self.timeout_secs {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                // Cancellation wins over an exit that raced with it
                if self.is_cancelled() {
                    return Ok((status.code(), false, true, false));
                }
                Ok((status.code(), status.success(), false, false))
            }
            _ = wait_cancelled(self.cancel_rx.clone()) => {
                info!("FFmpeg cancelled, stopping process");
                let code = terminate(child, self.grace).await;
                Ok((code, false, true, false))
            }
            _ = timeout => {
                let secs = self.timeout_secs.unwrap_or_default();
                warn!("FFmpeg timed out after {} seconds, stopping process", secs);
                let code = terminate(child, self.grace).await;
                Ok((code, false, false, true))
            }
        }
    }
}

/// Resolve once cancellation is requested; never if the sender goes away.
async fn wait_cancelled(rx: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = rx else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

/// SIGTERM, wait up to `grace`, then kill. Returns the exit code if any.
async fn terminate(child: &mut Child, grace: Duration) -> Option<i32> {
    send_sigterm(child);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => status.code(),
        Ok(Err(e)) => {
            warn!("Failed to wait for FFmpeg after SIGTERM: {}", e);
            None
        }
        Err(_) => {
            warn!(grace_ms = grace.as_millis() as u64, "FFmpeg ignored SIGTERM, killing");
            if let Err(e) = child.kill().await {
                warn!("Failed to kill FFmpeg: {}", e);
            }
            None
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(id) = child.id() {
        if let Err(e) = kill(Pid::from_raw(id as i32), Signal::SIGTERM) {
            debug!("SIGTERM failed: {}", e);
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) {}

async fn join_reader(handle: tokio::task::JoinHandle<String>, limit: Duration) -> String {
    match tokio::time::timeout(limit, handle).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!("Output reader task failed: {}", e);
            String::new()
        }
        Err(_) => {
            warn!("Output reader did not finish in time");
            String::new()
        }
    }
}

/// Locate FFmpeg: configured path, then PATH, then known install locations.
pub fn find_ffmpeg(configured: Option<&Path>) -> MediaResult<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        warn!(path = %path.display(), "Configured FFmpeg not found, searching");
    }
    if let Ok(path) = which::which("ffmpeg") {
        return Ok(path);
    }
    KNOWN_FFMPEG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
        .ok_or(MediaError::FfmpegNotFound)
}

/// Locate FFprobe next to `ffmpeg`, falling back to PATH.
pub fn find_ffprobe(ffmpeg: &Path) -> MediaResult<PathBuf> {
    let name = if cfg!(windows) { "ffprobe.exe" } else { "ffprobe" };
    if let Some(sibling) = ffmpeg.parent().map(|dir| dir.join(name)) {
        if sibling.is_file() {
            return Ok(sibling);
        }
    }
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

/// Whether an `ffmpeg -encoders` listing contains `name`.
pub fn encoders_include(listing: &str, name: &str) -> bool {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|encoder| encoder == name)
}

/// Pick the video codec: libx264 when this FFmpeg build has it, else mpeg4.
pub async fn detect_video_codec(ffmpeg: &Path) -> String {
    let output = Command::new(ffmpeg)
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .output()
        .await;

    match output {
        Ok(out) if encoders_include(&String::from_utf8_lossy(&out.stdout), DEFAULT_VIDEO_CODEC) => {
            DEFAULT_VIDEO_CODEC.to_string()
        }
        Ok(_) => {
            info!("libx264 unavailable, using {}", FALLBACK_VIDEO_CODEC);
            FALLBACK_VIDEO_CODEC.to_string()
        }
        Err(e) => {
            warn!("Could not list FFmpeg encoders: {}", e);
            FALLBACK_VIDEO_CODEC.to_string()
        }
    }
}
