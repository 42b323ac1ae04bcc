#![deny(unreachable_patterns)]
//! FFmpeg-driven transform pipeline for match footage.
//!
//! This crate provides:
//! - Mapping of normalized occlusion regions onto output pixels
//! - Temporally smoothed edge overlays computed from decoded frames
//! - Deterministic transform recipes rendered into `-filter_complex` graphs
//! - Encode orchestration with progress, cancellation and failure diagnostics

pub mod command;
pub mod coords;
pub mod diagnostics;
pub mod error;
pub mod filters;
pub mod frames;
pub mod fs_utils;
pub mod metrics;
pub mod orchestrator;
pub mod overlay;
pub mod probe;
pub mod progress;
pub mod recipe;
pub mod scratch;
pub mod watermark;

#[cfg(test)]
mod test_support;

pub use command::{detect_video_codec, find_ffmpeg, find_ffprobe, FfmpegCommand, FfmpegRunner, RunOutput};
pub use diagnostics::{classify, FailureReason, ProcessFailure};
pub use error::{MediaError, MediaResult};
pub use filters::{render_graph, FilterChainBuilder, FilterGraph, GraphInputs};
pub use frames::{FrameSource, MemoryFrames, RawFrame, VideoFrameSource};
pub use fs_utils::{ensure_disk_space, move_file, output_path_for};
pub use orchestrator::{
    CancelHandle, EncodeJob, EncodeOrchestrator, EncodeResult, EncodeSuccess, JobHandle, JobSlot,
    OrchestratorOptions,
};
pub use overlay::{write_overlay, EdgeFrame, EdgeFrames, EdgeOverlayGenerator, OverlayArtifact};
pub use probe::{probe_video, VideoInfo};
pub use progress::{FfmpegProgress, ProgressParser, ProgressTracker};
pub use recipe::{Stage, StageKind, TransformRecipe};
pub use scratch::ScratchDir;
