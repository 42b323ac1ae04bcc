//! FFmpeg progress parsing.
//!
//! `-progress pipe:2` emits blocks of `key=value` lines terminated by a
//! `progress=continue` or `progress=end` line. [`ProgressParser`] collects
//! one block at a time and only publishes it once the terminator arrives;
//! malformed lines are skipped without producing an update.

use serde::{Deserialize, Serialize};

/// Progress information from FFmpeg.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Fraction of `total_duration_ms` encoded so far, clamped to 0.0..=1.0.
    pub fn fraction(&self, total_duration_ms: i64) -> f64 {
        if self.is_complete {
            return 1.0;
        }
        if total_duration_ms <= 0 {
            return 0.0;
        }
        (self.out_time_ms as f64 / total_duration_ms as f64).clamp(0.0, 1.0)
    }

    /// Estimate time remaining in seconds.
    pub fn eta_seconds(&self, total_duration_ms: i64) -> Option<f64> {
        if self.speed <= 0.0 || self.out_time_ms <= 0 {
            return None;
        }

        let remaining_ms = total_duration_ms - self.out_time_ms;
        if remaining_ms <= 0 {
            return Some(0.0);
        }

        Some((remaining_ms as f64 / 1000.0) / self.speed)
    }
}

/// Parser position within the progress stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    /// Between blocks
    Idle,
    /// Inside a block, at least one key seen
    InBlock,
    /// `progress=end` seen; later lines are ignored
    Finished,
}

/// Incremental parser for `-progress` output.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    state: ParserState,
    block: FfmpegProgress,
    block_valid: bool,
    last: FfmpegProgress,
}

impl Default for ProgressParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Idle,
            block: FfmpegProgress::default(),
            block_valid: true,
            last: FfmpegProgress::default(),
        }
    }

    /// Whether `line` belongs to the progress protocol rather than diagnostics.
    pub fn is_progress_line(line: &str) -> bool {
        let Some((key, _)) = line.trim().split_once('=') else {
            return false;
        };
        matches!(
            key,
            "frame"
                | "fps"
                | "stream_0_0_q"
                | "bitrate"
                | "total_size"
                | "out_time_us"
                | "out_time_ms"
                | "out_time"
                | "dup_frames"
                | "drop_frames"
                | "speed"
                | "progress"
        ) || key.starts_with("stream_")
    }

    /// Feed one line; returns a snapshot when a complete, well-formed block ends.
    pub fn feed(&mut self, line: &str) -> Option<FfmpegProgress> {
        if self.state == ParserState::Finished {
            return None;
        }
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();

        if self.state == ParserState::Idle {
            // Each block starts from the last published values
            self.block = self.last.clone();
            self.block_valid = true;
            self.state = ParserState::InBlock;
        }

        match key {
            "out_time_us" => self.set(value.parse::<i64>().ok().map(|us| us / 1000), |p, v| {
                p.out_time_ms = v
            }),
            // Despite the name, FFmpeg reports microseconds here too
            "out_time_ms" => self.set(value.parse::<i64>().ok().map(|us| us / 1000), |p, v| {
                p.out_time_ms = v
            }),
            "frame" => self.set(value.parse::<u64>().ok(), |p, v| p.frame = v),
            "fps" => self.set(value.parse::<f64>().ok(), |p, v| p.fps = v),
            "speed" => {
                // "1.5x", or "N/A" early on
                if value != "N/A" {
                    let parsed = value.strip_suffix('x').and_then(|s| s.trim().parse().ok());
                    self.set(parsed, |p, v| p.speed = v);
                }
            }
            "progress" => return self.end_block(value),
            _ => {}
        }
        None
    }

    fn set<T>(&mut self, value: Option<T>, apply: impl FnOnce(&mut FfmpegProgress, T)) {
        match value {
            Some(v) => apply(&mut self.block, v),
            None => self.block_valid = false,
        }
    }

    fn end_block(&mut self, value: &str) -> Option<FfmpegProgress> {
        let complete = match value {
            "continue" => false,
            "end" => true,
            _ => {
                self.state = ParserState::Idle;
                return None;
            }
        };

        let valid = self.block_valid;
        self.state = if complete {
            ParserState::Finished
        } else {
            ParserState::Idle
        };
        if !valid && !complete {
            return None;
        }

        let mut snapshot = self.block.clone();
        snapshot.is_complete = complete;
        // Time never goes backwards in published updates
        snapshot.out_time_ms = snapshot.out_time_ms.max(self.last.out_time_ms);
        self.last = snapshot.clone();
        Some(snapshot)
    }

    /// Most recently published progress.
    pub fn last(&self) -> &FfmpegProgress {
        &self.last
    }
}

/// Maps progress snapshots to a monotonic fraction of the expected output.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_duration_ms: i64,
    fraction: f64,
}

impl ProgressTracker {
    /// `total_duration_ms` is the expected output duration.
    pub fn new(total_duration_ms: i64) -> Self {
        Self {
            total_duration_ms,
            fraction: 0.0,
        }
    }

    /// Update from a snapshot; returns the new fraction if it advanced.
    pub fn update(&mut self, progress: &FfmpegProgress) -> Option<f64> {
        let next = progress.fraction(self.total_duration_ms);
        if next > self.fraction {
            self.fraction = next;
            Some(next)
        } else {
            None
        }
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut ProgressParser, text: &str) -> Vec<FfmpegProgress> {
        text.lines().filter_map(|l| parser.feed(l)).collect()
    }

    #[test]
    fn test_progress_fraction() {
        let progress = FfmpegProgress {
            out_time_ms: 5000,
            ..Default::default()
        };

        assert!((progress.fraction(10000) - 0.5).abs() < 1e-9);
        assert!((progress.fraction(4000) - 1.0).abs() < 1e-9);
        assert_eq!(progress.fraction(0), 0.0);
    }

    #[test]
    fn test_eta_calculation() {
        let progress = FfmpegProgress {
            out_time_ms: 5000,
            speed: 2.0, // 2x realtime
            ..Default::default()
        };

        // 5 seconds remaining at 2x speed = 2.5 seconds ETA
        let eta = progress.eta_seconds(10000).unwrap();
        assert!((eta - 2.5).abs() < 0.01);
    }

    #[test]
    fn test_parser_publishes_on_block_end() {
        let mut parser = ProgressParser::new();
        assert!(parser.feed("frame=48").is_none());
        assert!(parser.feed("fps=24.0").is_none());
        assert!(parser.feed("out_time_us=2000000").is_none());
        assert!(parser.feed("speed=1.5x").is_none());

        let update = parser.feed("progress=continue").unwrap();
        assert_eq!(update.frame, 48);
        assert_eq!(update.out_time_ms, 2000);
        assert!((update.speed - 1.5).abs() < 1e-9);
        assert!(!update.is_complete);
    }

    #[test]
    fn test_malformed_block_yields_no_update() {
        let mut parser = ProgressParser::new();
        let updates = feed_all(
            &mut parser,
            "frame=10\nout_time_us=1000000\nprogress=continue\n\
             frame=garbage\nout_time_us=2000000\nprogress=continue\n\
             frame=30\nout_time_us=3000000\nprogress=continue\n",
        );
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].frame, 10);
        assert_eq!(updates[1].frame, 30);
    }

    #[test]
    fn test_end_block_and_speed_na() {
        let mut parser = ProgressParser::new();
        let updates = feed_all(
            &mut parser,
            "speed=N/A\nout_time_us=500000\nprogress=continue\nout_time_us=900000\nprogress=end\nframe=99\nprogress=continue\n",
        );
        assert_eq!(updates.len(), 2);
        assert!(updates[1].is_complete);
        assert_eq!(parser.last().frame, 0);
    }

    #[test]
    fn test_out_time_never_decreases() {
        let mut parser = ProgressParser::new();
        let updates = feed_all(
            &mut parser,
            "out_time_us=5000000\nprogress=continue\nout_time_us=-9223372036854775807\nprogress=continue\n",
        );
        assert_eq!(updates[1].out_time_ms, 5000);
    }

    #[test]
    fn test_tracker_is_monotonic_and_clamped() {
        let mut tracker = ProgressTracker::new(10_000);
        let at = |ms| FfmpegProgress {
            out_time_ms: ms,
            ..Default::default()
        };
        assert_eq!(tracker.update(&at(2_000)), Some(0.2));
        assert_eq!(tracker.update(&at(1_000)), None);
        assert_eq!(tracker.update(&at(50_000)), Some(1.0));
        assert_eq!(tracker.fraction(), 1.0);
    }

    #[test]
    fn test_is_progress_line() {
        assert!(ProgressParser::is_progress_line("out_time=00:00:01.000000"));
        assert!(ProgressParser::is_progress_line("stream_0_0_q=28.0"));
        assert!(!ProgressParser::is_progress_line("[libx264 @ 0x1] using cpu capabilities"));
        assert!(!ProgressParser::is_progress_line("Error initializing filter 'drawbox'"));
    }
}
