//! Video encoding configuration.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default video codec (H.264)
pub const DEFAULT_VIDEO_CODEC: &str = "libx264";
/// Fallback codec when the ffmpeg build lacks libx264
pub const FALLBACK_VIDEO_CODEC: &str = "mpeg4";
/// Default audio codec
pub const DEFAULT_AUDIO_CODEC: &str = "aac";
/// Default encoding preset
pub const DEFAULT_PRESET: &str = "fast";
/// Default CRF (Constant Rate Factor)
pub const DEFAULT_CRF: u8 = 23;
/// Quantizer used with the fallback codec
pub const FALLBACK_QSCALE: u8 = 3;
/// Default audio bitrate
pub const DEFAULT_AUDIO_BITRATE: &str = "128k";
/// Pixel format every output is normalized to
pub const DEFAULT_PIXEL_FORMAT: &str = "yuv420p";
/// Output container extension
pub const OUTPUT_EXTENSION: &str = "mp4";

/// Video encoding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EncodingConfig {
    /// Video codec (e.g., "libx264", "mpeg4")
    #[serde(default = "default_video_codec")]
    pub codec: String,

    /// Encoding preset (e.g., "fast", "medium", "slow")
    #[serde(default = "default_preset")]
    pub preset: String,

    /// Constant Rate Factor (quality, 0-51, lower is better)
    #[serde(default = "default_crf")]
    pub crf: u8,

    /// Pixel format required by the codec
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,

    /// Audio codec
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,

    /// Audio bitrate
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,

    /// Silence the audio track (it is still re-timed and kept)
    #[serde(default = "default_mute_audio")]
    pub mute_audio: bool,
}

fn default_video_codec() -> String {
    DEFAULT_VIDEO_CODEC.to_string()
}
fn default_preset() -> String {
    DEFAULT_PRESET.to_string()
}
fn default_crf() -> u8 {
    DEFAULT_CRF
}
fn default_pixel_format() -> String {
    DEFAULT_PIXEL_FORMAT.to_string()
}
fn default_audio_codec() -> String {
    DEFAULT_AUDIO_CODEC.to_string()
}
fn default_audio_bitrate() -> String {
    DEFAULT_AUDIO_BITRATE.to_string()
}
fn default_mute_audio() -> bool {
    true
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: DEFAULT_VIDEO_CODEC.to_string(),
            preset: DEFAULT_PRESET.to_string(),
            crf: DEFAULT_CRF,
            pixel_format: DEFAULT_PIXEL_FORMAT.to_string(),
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            audio_bitrate: DEFAULT_AUDIO_BITRATE.to_string(),
            mute_audio: true,
        }
    }
}

impl EncodingConfig {
    /// Create a new encoding configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new config with updated CRF.
    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = crf;
        self
    }

    /// Switch to the fallback codec for ffmpeg builds without libx264.
    pub fn with_fallback_codec(mut self) -> Self {
        self.codec = FALLBACK_VIDEO_CODEC.to_string();
        self
    }

    /// Whether the configured codec is x264 (takes CRF and preset).
    pub fn is_x264(&self) -> bool {
        self.codec == DEFAULT_VIDEO_CODEC
    }

    /// Codec-specific quality arguments.
    pub fn quality_args(&self) -> Vec<String> {
        if self.is_x264() {
            vec![
                "-crf".to_string(),
                self.crf.to_string(),
                "-preset".to_string(),
                self.preset.clone(),
            ]
        } else {
            vec!["-q:v".to_string(), FALLBACK_QSCALE.to_string()]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EncodingConfig::default();
        assert_eq!(config.codec, "libx264");
        assert_eq!(config.crf, 23);
        assert_eq!(config.pixel_format, "yuv420p");
        assert!(config.mute_audio);
    }

    #[test]
    fn test_quality_args_per_codec() {
        let config = EncodingConfig::default();
        assert_eq!(config.quality_args(), vec!["-crf", "23", "-preset", "fast"]);

        let fallback = EncodingConfig::default().with_fallback_codec();
        assert_eq!(fallback.quality_args(), vec!["-q:v", "3"]);
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: EncodingConfig = serde_json::from_str(r#"{"crf": 20}"#).unwrap();
        assert_eq!(config.crf, 20);
        assert_eq!(config.codec, DEFAULT_VIDEO_CODEC);
    }
}
