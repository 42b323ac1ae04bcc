//! Shared data models for the Eye Test video pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Normalized occlusion regions and pixel rectangles
//! - Color grading presets
//! - Processing configuration and its safety limits
//! - Encoding configuration
//! - Encode job identity and lifecycle state

pub mod config;
pub mod encoding;
pub mod job;
pub mod preset;
pub mod region;

// Re-export common types
pub use config::{ConfigError, Corner, EdgeParams, LogoConfig, ProcessingConfig, SafetyLimits};
pub use encoding::EncodingConfig;
pub use job::{EncodeState, JobId};
pub use preset::{ColorGrade, FilterPreset, LumaCurve, PresetParseError};
pub use region::{FrameSize, PixelRect, Region, RegionError, RegionList, MAX_REGIONS};
