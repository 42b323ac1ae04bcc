//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default minimum free space on the output filesystem (2 GB).
pub const DEFAULT_MIN_FREE_DISK_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Explicit ffmpeg binary; discovered when unset
    pub ffmpeg_path: Option<PathBuf>,
    /// Root for per-job scratch directories
    pub scratch_root: PathBuf,
    /// Where finished outputs are written
    pub output_dir: PathBuf,
    /// Keep scratch directories of failed jobs for inspection
    pub retain_failed_scratch: bool,
    /// Time between SIGTERM and a hard kill when cancelling
    pub cancel_grace: Duration,
    /// Upper bound for one encoder run
    pub job_timeout: Duration,
    /// Minimum free space required before a job starts
    pub min_free_disk_bytes: u64,
    /// Height the edge overlay is computed at
    pub overlay_max_height: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            scratch_root: std::env::temp_dir().join("eyetest"),
            output_dir: PathBuf::from("."),
            retain_failed_scratch: false,
            cancel_grace: Duration::from_secs(5),
            job_timeout: Duration::from_secs(3600), // 1 hour
            min_free_disk_bytes: DEFAULT_MIN_FREE_DISK_BYTES,
            overlay_max_height: 720,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any variable source; unparseable values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| parse_value(&v));

        Self {
            ffmpeg_path: lookup("EYETEST_FFMPEG")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            scratch_root: lookup("EYETEST_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_root),
            output_dir: lookup("EYETEST_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            retain_failed_scratch: lookup("EYETEST_RETAIN_FAILED")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(defaults.retain_failed_scratch),
            cancel_grace: parsed("EYETEST_CANCEL_GRACE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cancel_grace),
            job_timeout: parsed("EYETEST_JOB_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.job_timeout),
            min_free_disk_bytes: parsed("EYETEST_MIN_FREE_DISK_BYTES")
                .unwrap_or(defaults.min_free_disk_bytes),
            overlay_max_height: lookup("EYETEST_OVERLAY_HEIGHT")
                .and_then(|v| parse_value(&v))
                .filter(|h: &u32| *h >= 2)
                .unwrap_or(defaults.overlay_max_height),
        }
    }
}

fn parse_value<T: FromStr>(value: &str) -> Option<T> {
    value.trim().parse().ok()
}
