//! Cartoon-edge overlay generation.
//!
//! Each source frame goes through grayscale, Gaussian blur, Canny edge
//! detection and an optional dilation, and is scaled by the configured
//! opacity. The result is blended with the previous *overlay* frame
//! (not the previous raw mask):
//!
//! ```text
//! overlay[0] = raw[0]
//! overlay[i] = w * raw[i] + (1 - w) * overlay[i - 1]
//! ```
//!
//! which makes the overlay a first-order IIR filter over time. The
//! accumulator lives in the iterator returned by
//! [`EdgeOverlayGenerator::generate`], so separate calls never share state.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::dilate;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use eyetest_models::{EdgeParams, FrameSize};

use crate::error::{MediaError, MediaResult};
use crate::frames::{FrameSource, RawFrame};
use crate::metrics;

/// One element of the overlay sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeFrame {
    /// Frame index, matching the source frame it was computed from
    pub index: u64,
    pub width: u32,
    pub height: u32,
    /// Row-major opacity values in 0.0..=1.0
    pub opacity: Vec<f32>,
}

impl EdgeFrame {
    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    /// Opacity at pixel (x, y), `None` outside the frame.
    pub fn at(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let index = y as usize * self.width as usize + x as usize;
        self.opacity.get(index).copied()
    }

    /// Quantize to an 8-bit mask (0 = transparent, 255 = opaque).
    pub fn to_luma8(&self) -> GrayImage {
        let data = self
            .opacity
            .iter()
            .map(|v| (v * 255.0).round().clamp(0.0, 255.0) as u8)
            .collect();
        GrayImage::from_raw(self.width, self.height, data)
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }
}

/// Produces temporally smoothed edge overlays from frame sequences.
#[derive(Debug, Clone)]
pub struct EdgeOverlayGenerator {
    params: EdgeParams,
}

impl EdgeOverlayGenerator {
    /// Create a generator after validating the parameters.
    pub fn new(params: EdgeParams) -> MediaResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &EdgeParams {
        &self.params
    }

    /// Start a new pass over `source`.
    ///
    /// The returned iterator yields exactly one [`EdgeFrame`] per source
    /// frame. The first decode failure is yielded as an error and ends the
    /// sequence.
    pub fn generate<S: FrameSource>(&self, source: &S) -> MediaResult<EdgeFrames<S::Frames>> {
        Ok(self.blend(source.frames()?))
    }

    /// Run the overlay over an arbitrary frame iterator.
    pub fn blend<I>(&self, frames: I) -> EdgeFrames<I::IntoIter>
    where
        I: IntoIterator<Item = MediaResult<RawFrame>>,
    {
        EdgeFrames {
            frames: frames.into_iter(),
            params: self.params.clone(),
            previous: None,
            failed: false,
        }
    }

    /// Raw (unblended) edge contribution of one frame, scaled by opacity.
    pub fn raw_mask(&self, frame: &RawFrame) -> Vec<f32> {
        raw_mask(&self.params, frame)
    }
}

fn raw_mask(params: &EdgeParams, frame: &RawFrame) -> Vec<f32> {
    let gray = image::imageops::grayscale(&frame.image);
    let smoothed = match params.blur_sigma() {
        Some(sigma) => gaussian_blur_f32(&gray, sigma),
        None => gray,
    };

    let mut edges = canny(&smoothed, params.canny_low, params.canny_high);
    if params.dilate_radius > 0 {
        edges = dilate(&edges, Norm::LInf, params.dilate_radius);
    }

    let scale = params.opacity / 255.0;
    edges.pixels().map(|Luma([v])| *v as f32 * scale).collect()
}

/// Lazy overlay sequence; owns the temporal accumulator.
pub struct EdgeFrames<I> {
    frames: I,
    params: EdgeParams,
    previous: Option<EdgeFrame>,
    failed: bool,
}

impl<I> Iterator for EdgeFrames<I>
where
    I: Iterator<Item = MediaResult<RawFrame>>,
{
    type Item = MediaResult<EdgeFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let frame = match self.frames.next()? {
            Ok(frame) => frame,
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        };

        let raw = raw_mask(&self.params, &frame);
        let (width, height) = (frame.image.width(), frame.image.height());

        let opacity = match &self.previous {
            None => raw.into_iter().map(|v| v.clamp(0.0, 1.0)).collect(),
            Some(prev) if prev.width != width || prev.height != height => {
                self.failed = true;
                return Some(Err(MediaError::decode(
                    frame.index,
                    format!(
                        "frame size changed from {}x{} to {}x{}",
                        prev.width, prev.height, width, height
                    ),
                )));
            }
            Some(prev) => {
                let w = self.params.temporal_weight;
                raw.iter()
                    .zip(&prev.opacity)
                    .map(|(r, p)| (w * r + (1.0 - w) * p).clamp(0.0, 1.0))
                    .collect()
            }
        };

        let edge = EdgeFrame {
            index: frame.index,
            width,
            height,
            opacity,
        };
        self.previous = Some(edge.clone());
        Some(Ok(edge))
    }
}

/// A finished overlay sequence stored as raw 8-bit gray frames.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayArtifact {
    pub path: PathBuf,
    pub size: FrameSize,
    pub fps: f64,
    pub frame_count: u64,
}

impl OverlayArtifact {
    /// FFmpeg input arguments reading this artifact as a video stream.
    pub fn input_args(&self) -> Vec<String> {
        vec![
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "gray".to_string(),
            "-s".to_string(),
            format!("{}x{}", self.size.width, self.size.height),
            "-framerate".to_string(),
            format!("{:.6}", self.fps),
        ]
    }
}

/// Drain an overlay sequence into a raw gray file at `path`.
///
/// `should_stop` is polled between frames; returning `true` aborts with
/// [`MediaError::Cancelled`]. The sequence must be complete before the
/// artifact is handed to the encoder, so any error leaves no artifact.
pub fn write_overlay<I, F>(
    frames: I,
    path: &Path,
    fps: f64,
    mut should_stop: F,
) -> MediaResult<OverlayArtifact>
where
    I: Iterator<Item = MediaResult<EdgeFrame>>,
    F: FnMut() -> bool,
{
    let result = (|| {
        let mut writer = BufWriter::new(File::create(path)?);
        let mut size = None;
        let mut count = 0u64;

        for frame in frames {
            if should_stop() {
                return Err(MediaError::Cancelled);
            }
            let frame = frame?;
            size.get_or_insert(frame.size());
            writer.write_all(frame.to_luma8().as_raw())?;
            count += 1;
            if count % 500 == 0 {
                debug!(frames = count, "Overlay progress");
            }
        }
        writer.flush()?;

        Ok(OverlayArtifact {
            path: path.to_path_buf(),
            size: size.unwrap_or(FrameSize::new(0, 0)),
            fps,
            frame_count: count,
        })
    })();

    match &result {
        Ok(artifact) => {
            metrics::record_overlay_frames(artifact.frame_count);
            info!(
                path = %path.display(),
                frames = artifact.frame_count,
                width = artifact.size.width,
                height = artifact.size.height,
                "Edge overlay written"
            );
        }
        Err(_) => {
            let _ = std::fs::remove_file(path);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::MemoryFrames;
    use image::{Rgb, RgbImage};

    /// White square on black; produces a ring of edges.
    fn square_frame(size: u32, offset: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| {
            let inside = (offset..offset + size / 2).contains(&x)
                && (offset..offset + size / 2).contains(&y);
            if inside {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        })
    }

    fn generator(weight: f32) -> EdgeOverlayGenerator {
        EdgeOverlayGenerator::new(EdgeParams {
            temporal_weight: weight,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_at_is_bounds_checked() {
        let frame = EdgeFrame {
            index: 0,
            width: 2,
            height: 2,
            opacity: vec![0.0, 0.25, 0.5, 1.0],
        };
        assert_eq!(frame.at(1, 0), Some(0.25));
        assert_eq!(frame.at(0, 1), Some(0.5));
        assert_eq!(frame.at(1, 1), Some(1.0));
        assert_eq!(frame.at(2, 0), None);
        assert_eq!(frame.at(0, 2), None);
        assert_eq!(frame.at(u32::MAX, u32::MAX), None);
    }

    #[test]
    fn test_length_matches_input() {
        let gen = generator(0.85);
        for n in [0usize, 1, 7] {
            let source = MemoryFrames::new((0..n).map(|_| square_frame(32, 8)).collect());
            let frames: Vec<_> = gen.generate(&source).unwrap().collect();
            assert_eq!(frames.len(), n);
            for (i, frame) in frames.iter().enumerate() {
                assert_eq!(frame.as_ref().unwrap().index, i as u64);
            }
        }
    }

    #[test]
    fn test_first_frame_is_raw_mask() {
        let gen = generator(0.85);
        let source = MemoryFrames::new(vec![square_frame(32, 8)]);
        let first = gen.generate(&source).unwrap().next().unwrap().unwrap();
        let raw = gen.raw_mask(&RawFrame::new(0, square_frame(32, 8)));
        assert_eq!(first.opacity, raw);
        assert!(first.opacity.iter().any(|v| *v > 0.0), "expected some edges");
    }

    #[test]
    fn test_constant_input_converges_without_overshoot() {
        let gen = generator(0.85);
        let opacity = gen.params().opacity;

        // An empty frame followed by a constant frame: the overlay must rise
        // towards the constant mask and never exceed it.
        let mut images = vec![RgbImage::new(32, 32)];
        images.extend((0..20).map(|_| square_frame(32, 8)));
        let target = gen.raw_mask(&RawFrame::new(0, square_frame(32, 8)));

        let frames: Vec<EdgeFrame> = gen
            .generate(&MemoryFrames::new(images))
            .unwrap()
            .map(|f| f.unwrap())
            .collect();

        for frame in &frames {
            for (v, t) in frame.opacity.iter().zip(&target) {
                assert!(*v <= t + 1e-6, "overshoot: {v} > {t}");
                assert!(*v <= opacity + 1e-6);
            }
        }

        // (1 - 0.85)^5 < 1e-4: within five frames every pixel is close
        let settled = &frames[6];
        for (v, t) in settled.opacity.iter().zip(&target) {
            assert!((t - v).abs() < 1e-3, "not converged: {v} vs {t}");
        }
    }

    #[test]
    fn test_blend_uses_previous_overlay_not_previous_raw() {
        let gen = generator(0.5);
        let edges = square_frame(32, 8);
        let blank = RgbImage::new(32, 32);

        let frames: Vec<EdgeFrame> = gen
            .generate(&MemoryFrames::new(vec![edges.clone(), blank.clone(), blank]))
            .unwrap()
            .map(|f| f.unwrap())
            .collect();

        let raw = gen.raw_mask(&RawFrame::new(0, edges));
        let (i, peak) = raw
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |best, (i, v)| if *v > best.1 { (i, *v) } else { best });

        // IIR decay: 0.5, then 0.25 of the peak. A window over raw masks would give 0.
        assert!((frames[1].opacity[i] - peak * 0.5).abs() < 1e-6);
        assert!((frames[2].opacity[i] - peak * 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_deterministic_across_calls() {
        let gen = generator(0.85);
        let source = MemoryFrames::new((0..4).map(|i| square_frame(32, 4 + i)).collect());
        let a: Vec<_> = gen.generate(&source).unwrap().map(|f| f.unwrap()).collect();
        let b: Vec<_> = gen.generate(&source).unwrap().map(|f| f.unwrap()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_decode_error_ends_sequence() {
        let gen = generator(0.85);
        let frames = vec![
            Ok(RawFrame::new(0, square_frame(16, 4))),
            Err(MediaError::decode(1, "corrupt")),
            Ok(RawFrame::new(2, square_frame(16, 4))),
        ];
        let out: Vec<_> = gen.blend(frames).collect();
        assert_eq!(out.len(), 2);
        assert!(out[0].is_ok());
        assert!(matches!(out[1], Err(MediaError::Decode { frame_index: 1, .. })));
    }

    #[test]
    fn test_size_change_is_decode_error() {
        let gen = generator(0.85);
        let frames = vec![
            Ok(RawFrame::new(0, square_frame(16, 4))),
            Ok(RawFrame::new(1, square_frame(32, 4))),
        ];
        let out: Vec<_> = gen.blend(frames).collect();
        assert!(matches!(out[1], Err(MediaError::Decode { frame_index: 1, .. })));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let err = EdgeOverlayGenerator::new(EdgeParams {
            blur_kernel: 2,
            ..Default::default()
        })
        .unwrap_err();
        assert_eq!(err.kind(), "config_validation");
    }

    #[test]
    fn test_write_overlay_artifact() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("overlay.gray");
        let gen = generator(0.85);
        let source = MemoryFrames::new((0..3).map(|_| square_frame(16, 4)).collect());

        let artifact = write_overlay(gen.generate(&source).unwrap(), &path, 25.0, || false).unwrap();
        assert_eq!(artifact.frame_count, 3);
        assert_eq!(artifact.size, FrameSize::new(16, 16));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 3 * 16 * 16);
        assert!(artifact.input_args().contains(&"16x16".to_string()));
    }

    #[test]
    fn test_write_overlay_cancel_removes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("overlay.gray");
        let gen = generator(0.85);
        let source = MemoryFrames::new((0..3).map(|_| square_frame(16, 4)).collect());

        let mut polls = 0;
        let err = write_overlay(gen.generate(&source).unwrap(), &path, 25.0, || {
            polls += 1;
            polls > 1
        })
        .unwrap_err();
        assert!(err.is_cancelled());
        assert!(!path.exists());
    }
}
