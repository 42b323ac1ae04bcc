//! Decoded frame sources for the edge overlay.
//!
//! Decoding goes through FFmpeg's `rawvideo` output: frames are read as
//! packed RGB24 from the child's stdout, one fixed-size chunk per frame.
//! A short chunk or a failing decoder is a decode error for that frame.

use image::RgbImage;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use tracing::{debug, warn};

use eyetest_models::FrameSize;

use crate::error::{MediaError, MediaResult};

/// One decoded source frame.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Position in the (trimmed) source, starting at 0
    pub index: u64,
    pub image: RgbImage,
}

impl RawFrame {
    pub fn new(index: u64, image: RgbImage) -> Self {
        Self { index, image }
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.image.width(), self.image.height())
    }
}

/// A source that can be read from the start any number of times.
///
/// Every call to [`frames`](Self::frames) starts a fresh, independent pass.
pub trait FrameSource {
    type Frames: Iterator<Item = MediaResult<RawFrame>>;

    /// Start a new forward-only pass over the frames.
    fn frames(&self) -> MediaResult<Self::Frames>;
}

/// In-memory frames, mostly useful for tests and previews.
#[derive(Debug, Clone, Default)]
pub struct MemoryFrames {
    frames: Vec<RgbImage>,
}

impl MemoryFrames {
    pub fn new(frames: Vec<RgbImage>) -> Self {
        Self { frames }
    }
}

impl FrameSource for MemoryFrames {
    type Frames = std::vec::IntoIter<MediaResult<RawFrame>>;

    fn frames(&self) -> MediaResult<Self::Frames> {
        let frames: Vec<_> = self
            .frames
            .iter()
            .enumerate()
            .map(|(i, img)| Ok(RawFrame::new(i as u64, img.clone())))
            .collect();
        Ok(frames.into_iter())
    }
}

/// Scale `source` down to `max_height`, keeping aspect and even dimensions.
///
/// Sources already at or below `max_height` keep their size (rounded to even).
pub fn processing_size(source: FrameSize, max_height: u32) -> FrameSize {
    let even = |v: u32| (v / 2 * 2).max(2);
    if source.height <= max_height || source.height == 0 {
        return FrameSize::new(even(source.width), even(source.height));
    }
    let width = (source.width as f64 * max_height as f64 / source.height as f64).round() as u32;
    FrameSize::new(even(width), even(max_height))
}

/// Frames of a video file decoded by an FFmpeg child process.
#[derive(Debug, Clone)]
pub struct VideoFrameSource {
    ffmpeg: PathBuf,
    input: PathBuf,
    size: FrameSize,
    trim_start_secs: f64,
}

impl VideoFrameSource {
    /// Decode `input` at `size` (the decoder scales), starting `trim_start_secs` in.
    pub fn new(ffmpeg: impl AsRef<Path>, input: impl AsRef<Path>, size: FrameSize) -> Self {
        Self {
            ffmpeg: ffmpeg.as_ref().to_path_buf(),
            input: input.as_ref().to_path_buf(),
            size,
            trim_start_secs: 0.0,
        }
    }

    /// Skip the first seconds of the source.
    pub fn with_trim_start(mut self, secs: f64) -> Self {
        self.trim_start_secs = secs.max(0.0);
        self
    }

    /// Size of the decoded frames.
    pub fn size(&self) -> FrameSize {
        self.size
    }

    fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-v".to_string(),
            "error".to_string(),
        ];
        if self.trim_start_secs > 0.0 {
            args.push("-ss".to_string());
            args.push(format!("{:.3}", self.trim_start_secs));
        }
        args.extend([
            "-i".to_string(),
            self.input.to_string_lossy().to_string(),
            "-an".to_string(),
            "-vf".to_string(),
            format!("scale={}:{}", self.size.width, self.size.height),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-".to_string(),
        ]);
        args
    }
}

impl FrameSource for VideoFrameSource {
    type Frames = DecodedFrames;

    fn frames(&self) -> MediaResult<DecodedFrames> {
        let args = self.build_args();
        debug!(
            input = %self.input.display(),
            width = self.size.width,
            height = self.size.height,
            "Starting frame decoder"
        );

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MediaError::spawn_failed(self.ffmpeg.display().to_string(), e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("decoder stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("decoder stderr not captured"))?;

        // Drain stderr on its own thread so a chatty decoder never blocks on a full pipe
        let stderr_reader = std::thread::spawn(move || {
            let mut text = String::new();
            let mut stderr = stderr;
            let _ = stderr.read_to_string(&mut text);
            text
        });

        Ok(DecodedFrames {
            child: Some(child),
            stdout,
            stderr_reader: Some(stderr_reader),
            size: self.size,
            next_index: 0,
            done: false,
        })
    }
}

/// Forward-only iterator over frames produced by a decoder process.
pub struct DecodedFrames {
    child: Option<Child>,
    stdout: ChildStdout,
    stderr_reader: Option<JoinHandle<String>>,
    size: FrameSize,
    next_index: u64,
    done: bool,
}

impl DecodedFrames {
    fn frame_bytes(&self) -> usize {
        self.size.width as usize * self.size.height as usize * 3
    }

    /// Fill `buf`, returning how many bytes were read before EOF.
    fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// Reap the decoder once stdout is exhausted.
    fn finish(&mut self) -> MediaResult<()> {
        let stderr = self
            .stderr_reader
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait()?;
        if status.success() {
            debug!(frames = self.next_index, "Frame decoder finished");
            Ok(())
        } else {
            Err(MediaError::decode(
                self.next_index,
                format!(
                    "decoder exited with {:?}: {}",
                    status.code(),
                    stderr.trim()
                ),
            ))
        }
    }
}

impl Iterator for DecodedFrames {
    type Item = MediaResult<RawFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut buf = vec![0u8; self.frame_bytes()];
        let filled = match self.read_chunk(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                self.done = true;
                return Some(Err(MediaError::decode(self.next_index, e.to_string())));
            }
        };

        if filled == 0 {
            self.done = true;
            return self.finish().err().map(Err);
        }

        if filled < buf.len() {
            self.done = true;
            let index = self.next_index;
            let _ = self.finish();
            return Some(Err(MediaError::decode(
                index,
                format!("truncated frame: {} of {} bytes", filled, buf.len()),
            )));
        }

        let Some(image) = RgbImage::from_raw(self.size.width, self.size.height, buf) else {
            self.done = true;
            return Some(Err(MediaError::decode(self.next_index, "frame buffer size mismatch")));
        };

        let frame = RawFrame::new(self.next_index, image);
        self.next_index += 1;
        Some(Ok(frame))
    }
}

impl Drop for DecodedFrames {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                if e.kind() != ErrorKind::InvalidInput {
                    warn!("Failed to stop frame decoder: {}", e);
                }
            }
            let _ = child.wait();
        }
        if let Some(handle) = self.stderr_reader.take() {
            let _ = handle.join();
        }
    }
}
