//! Processing configuration supplied by the settings store.
//!
//! The settings store hands over a flat key/value map. Everything in it is
//! untrusted: [`ProcessingConfig::validate`] checks every numeric parameter
//! against [`SafetyLimits`] before a recipe can be built from it.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::encoding::EncodingConfig;
use crate::preset::FilterPreset;
use crate::region::MAX_REGIONS;

/// Configuration validation failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("Unknown filter preset: {0}")]
    UnknownPreset(String),

    #[error("{field} = {value} is out of range ({min}..={max})")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("Too many regions: {count} (maximum {max})")]
    TooManyRegions { count: usize, max: usize },

    #[error("Logo asset not found: {0}")]
    LogoMissing(PathBuf),

    #[error("Logo asset not readable: {path}: {reason}")]
    LogoUnreadable { path: PathBuf, reason: String },

    #[error("Invalid edge parameters: {0}")]
    InvalidEdgeParams(String),
}

impl ConfigError {
    fn invalid(key: &str, value: &str) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

/// Safe bounds for the tunable perturbation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SafetyLimits {
    pub min_speed: f64,
    pub max_speed: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub max_regions: usize,
    pub max_trim_secs: f64,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            // atempo only accepts 0.5..=2.0 in a single instance
            min_speed: 0.5,
            max_speed: 2.0,
            min_zoom: 1.0,
            max_zoom: 1.5,
            max_regions: MAX_REGIONS,
            max_trim_secs: 3600.0,
        }
    }
}

/// Screen corner used to anchor the logo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Corner {
    TopLeft,
    TopRight,
    #[default]
    BottomLeft,
    BottomRight,
}

impl std::str::FromStr for Corner {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "top_left" => Ok(Corner::TopLeft),
            "top_right" => Ok(Corner::TopRight),
            "bottom_left" => Ok(Corner::BottomLeft),
            "bottom_right" => Ok(Corner::BottomRight),
            _ => Err(ConfigError::invalid("logo.corner", s)),
        }
    }
}

/// Logo watermark settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LogoConfig {
    /// Whether to composite the logo at all
    pub enabled: bool,
    /// Path to the logo image
    pub path: PathBuf,
    /// Logo height in output pixels (width follows aspect)
    pub height: u32,
    /// Inset from the anchoring corner in pixels
    pub margin: u32,
    /// Opacity (0.0 to 1.0)
    pub opacity: f64,
    /// Anchoring corner
    pub corner: Corner,
}

impl Default for LogoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("assets/logo.jpg"),
            height: 100,
            margin: 20,
            opacity: 0.8,
            corner: Corner::BottomLeft,
        }
    }
}

/// Parameters of the cartoon-edge overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EdgeParams {
    /// Gaussian kernel size (odd, 1 disables blurring)
    pub blur_kernel: u32,
    /// Lower hysteresis threshold
    pub canny_low: f32,
    /// Upper hysteresis threshold
    pub canny_high: f32,
    /// Opacity applied to detected edges (0.0 to 1.0)
    pub opacity: f32,
    /// Weight of the current frame in the temporal blend (0.0 exclusive to 1.0)
    pub temporal_weight: f32,
    /// Dilation radius used to thicken edges (0 disables)
    pub dilate_radius: u8,
}

impl Default for EdgeParams {
    fn default() -> Self {
        Self {
            blur_kernel: 5,
            canny_low: 30.0,
            canny_high: 70.0,
            opacity: 0.25,
            temporal_weight: 0.85,
            dilate_radius: 1,
        }
    }
}

impl EdgeParams {
    /// Check the parameters for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.blur_kernel == 0 || self.blur_kernel % 2 == 0 || self.blur_kernel > 31 {
            return Err(ConfigError::InvalidEdgeParams(format!(
                "blur kernel must be odd and within 1..=31, got {}",
                self.blur_kernel
            )));
        }
        if !(self.canny_low >= 0.0 && self.canny_low <= self.canny_high) {
            return Err(ConfigError::InvalidEdgeParams(format!(
                "thresholds must satisfy 0 <= low <= high, got {}..{}",
                self.canny_low, self.canny_high
            )));
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(ConfigError::InvalidEdgeParams(format!(
                "opacity must be within 0..=1, got {}",
                self.opacity
            )));
        }
        if !(self.temporal_weight > 0.0 && self.temporal_weight <= 1.0) {
            return Err(ConfigError::InvalidEdgeParams(format!(
                "temporal weight must be within (0, 1], got {}",
                self.temporal_weight
            )));
        }
        if self.dilate_radius > 5 {
            return Err(ConfigError::InvalidEdgeParams(format!(
                "dilate radius must be at most 5, got {}",
                self.dilate_radius
            )));
        }
        Ok(())
    }

    /// Gaussian sigma equivalent to the configured kernel size.
    ///
    /// Uses the usual `0.3 * ((k - 1) / 2 - 1) + 0.8` relation; `None` when
    /// blurring is disabled.
    pub fn blur_sigma(&self) -> Option<f32> {
        if self.blur_kernel <= 1 {
            return None;
        }
        let k = self.blur_kernel as f32;
        Some(0.3 * ((k - 1.0) * 0.5 - 1.0) + 0.8)
    }
}

/// Full processing configuration for one clip.
///
/// This is an immutable value handed to the chain builder; nothing in the
/// pipeline reads processing settings from ambient state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Grading preset name (validated against [`FilterPreset`])
    pub preset: String,
    /// Playback speed multiplier
    pub speed: f64,
    /// Zoom factor (1.0 = no crop)
    pub zoom: f64,
    /// Mirror the output horizontally
    pub mirror: bool,
    /// Seconds to skip from the start of the source
    pub trim_start_secs: f64,
    /// Whether the cartoon-edge overlay is composited
    pub edge_overlay: bool,
    pub edge: EdgeParams,
    pub logo: LogoConfig,
    pub encoding: EncodingConfig,
    /// Operator bounds; never read from or written to settings input
    #[serde(skip)]
    #[schemars(skip)]
    pub limits: SafetyLimits,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            preset: FilterPreset::Warm.as_str().to_string(),
            speed: 1.12,
            zoom: 1.08,
            mirror: true,
            trim_start_secs: 0.0,
            edge_overlay: true,
            edge: EdgeParams::default(),
            logo: LogoConfig::default(),
            encoding: EncodingConfig::default(),
            limits: SafetyLimits::default(),
        }
    }
}

impl ProcessingConfig {
    /// Build a config from the settings store's flat key/value pairs.
    ///
    /// Missing keys keep their defaults; unknown keys are ignored so the
    /// store can hold unrelated settings. Values that fail to parse are
    /// rejected here, range checks happen in [`validate`](Self::validate).
    pub fn from_key_values<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        config.apply_key_values(pairs)?;
        Ok(config)
    }

    /// Apply key/value overrides on top of this config.
    pub fn apply_key_values<I, K, V>(&mut self, pairs: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let config = self;
        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            match key {
                "preset" => config.preset = value.to_string(),
                "speed" => config.speed = parse_num(key, value)?,
                "zoom" => config.zoom = parse_num(key, value)?,
                "mirror" => config.mirror = parse_bool(key, value)?,
                "trim_start_secs" => config.trim_start_secs = parse_num(key, value)?,
                "edge.enabled" => config.edge_overlay = parse_bool(key, value)?,
                "edge.blur_kernel" => config.edge.blur_kernel = parse_num(key, value)?,
                "edge.canny_low" => config.edge.canny_low = parse_num(key, value)?,
                "edge.canny_high" => config.edge.canny_high = parse_num(key, value)?,
                "edge.opacity" => config.edge.opacity = parse_num(key, value)?,
                "edge.temporal_weight" => config.edge.temporal_weight = parse_num(key, value)?,
                "edge.dilate_radius" => config.edge.dilate_radius = parse_num(key, value)?,
                "logo.enabled" => config.logo.enabled = parse_bool(key, value)?,
                "logo.path" => config.logo.path = PathBuf::from(value),
                "logo.height" => config.logo.height = parse_num(key, value)?,
                "logo.margin" => config.logo.margin = parse_num(key, value)?,
                "logo.opacity" => config.logo.opacity = parse_num(key, value)?,
                "logo.corner" => config.logo.corner = value.parse()?,
                "encoding.crf" => config.encoding.crf = parse_num(key, value)?,
                "encoding.preset" => config.encoding.preset = value.to_string(),
                _ => {}
            }
        }
        Ok(())
    }

    /// Validate every parameter and resolve the preset.
    ///
    /// Filesystem checks (logo readability) are left to the chain builder.
    pub fn validate(&self) -> Result<FilterPreset, ConfigError> {
        let preset: FilterPreset = self
            .preset
            .parse()
            .map_err(|_| ConfigError::UnknownPreset(self.preset.clone()))?;

        let limits = &self.limits;
        check_range("speed", self.speed, limits.min_speed, limits.max_speed)?;
        check_range("zoom", self.zoom, limits.min_zoom, limits.max_zoom)?;
        check_range("trim_start_secs", self.trim_start_secs, 0.0, limits.max_trim_secs)?;
        check_range("logo.opacity", self.logo.opacity, 0.0, 1.0)?;
        if self.logo.enabled {
            check_range("logo.height", self.logo.height as f64, 1.0, 2160.0)?;
        }
        check_range("encoding.crf", self.encoding.crf as f64, 0.0, 51.0)?;
        if self.edge_overlay {
            self.edge.validate()?;
        }
        Ok(preset)
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_validate() {
        let config = ProcessingConfig::default();
        assert_eq!(config.validate().unwrap(), FilterPreset::Warm);
    }

    #[test]
    fn test_from_key_values() {
        let pairs: HashMap<&str, &str> = [
            ("preset", "cool"),
            ("speed", "1.05"),
            ("zoom", "1.2"),
            ("mirror", "false"),
            ("logo.corner", "top-right"),
            ("output_folder", "/somewhere"),
        ]
        .into_iter()
        .collect();

        let config = ProcessingConfig::from_key_values(pairs).unwrap();
        assert_eq!(config.validate().unwrap(), FilterPreset::Cool);
        assert!((config.speed - 1.05).abs() < 1e-12);
        assert!(!config.mirror);
        assert_eq!(config.logo.corner, Corner::TopRight);
    }

    #[test]
    fn test_apply_key_values_keeps_other_fields() {
        let mut config = ProcessingConfig {
            zoom: 1.15,
            ..Default::default()
        };
        config
            .apply_key_values([("edge.enabled", "off"), ("trim_start_secs", "4.5")])
            .unwrap();
        assert!((config.zoom - 1.15).abs() < 1e-12);
        assert!(!config.edge_overlay);
        assert!((config.trim_start_secs - 4.5).abs() < 1e-12);
    }

    #[test]
    fn test_from_key_values_rejects_garbage() {
        let err = ProcessingConfig::from_key_values([("speed", "fast")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = ProcessingConfig::from_key_values([("mirror", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_validate_unknown_preset() {
        let config = ProcessingConfig {
            preset: "SEPIA".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownPreset("SEPIA".to_string()))
        );
    }

    #[test]
    fn test_validate_out_of_range() {
        let config = ProcessingConfig {
            speed: 3.0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "speed", .. })
        ));

        let config = ProcessingConfig {
            zoom: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "zoom", .. })
        ));
    }

    #[test]
    fn test_settings_cannot_raise_their_own_limits() {
        let json = r#"{
            "speed": 50,
            "zoom": 40,
            "limits": {"min_speed": 0.1, "max_speed": 100, "min_zoom": 1.0,
                       "max_zoom": 100, "max_regions": 1000, "max_trim_secs": 1e9}
        }"#;
        let config: ProcessingConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.limits, SafetyLimits::default());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { field: "speed", .. })
        ));

        let echoed = serde_json::to_value(ProcessingConfig::default()).unwrap();
        assert!(echoed.get("limits").is_none());
    }

    #[test]
    fn test_edge_params_validation() {
        let mut params = EdgeParams::default();
        assert!(params.validate().is_ok());

        params.blur_kernel = 4;
        assert!(params.validate().is_err());

        params = EdgeParams {
            canny_low: 80.0,
            canny_high: 40.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());

        params = EdgeParams {
            temporal_weight: 0.0,
            ..Default::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_blur_sigma_matches_kernel() {
        let params = EdgeParams::default();
        assert!((params.blur_sigma().unwrap() - 1.1).abs() < 1e-6);

        let params = EdgeParams {
            blur_kernel: 1,
            ..Default::default()
        };
        assert!(params.blur_sigma().is_none());
    }
}
