//! Color grading presets.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Available color grading presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterPreset {
    /// Warm tones, boosted saturation
    Warm,
    /// Cool tones, reduced saturation
    Cool,
}

impl FilterPreset {
    /// All selectable presets.
    pub const ALL: &'static [FilterPreset] = &[FilterPreset::Warm, FilterPreset::Cool];

    /// Canonical upper-case name, as stored in settings.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterPreset::Warm => "WARM",
            FilterPreset::Cool => "COOL",
        }
    }

    /// Returns the preset name as used in filenames.
    pub fn as_filename_part(&self) -> &'static str {
        match self {
            FilterPreset::Warm => "warm",
            FilterPreset::Cool => "cool",
        }
    }

    /// Short human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            FilterPreset::Warm => "Warm tones, boosted saturation",
            FilterPreset::Cool => "Cool tones, reduced saturation",
        }
    }

    /// The grading parameters this preset resolves to.
    pub fn grade(&self) -> ColorGrade {
        match self {
            FilterPreset::Warm => ColorGrade {
                red_midtones: 0.12,
                blue_midtones: -0.12,
                saturation: 1.30,
                luma: LumaCurve {
                    gain: 1.30,
                    pivot: 0.0,
                },
            },
            FilterPreset::Cool => ColorGrade {
                red_midtones: -0.08,
                blue_midtones: 0.08,
                saturation: 0.80,
                luma: LumaCurve {
                    gain: 1.05,
                    pivot: 128.0,
                },
            },
        }
    }
}

impl fmt::Display for FilterPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FilterPreset {
    type Err = PresetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "WARM" => Ok(FilterPreset::Warm),
            "COOL" => Ok(FilterPreset::Cool),
            _ => Err(PresetParseError(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("Unknown filter preset: {0}")]
pub struct PresetParseError(pub String);

/// A composed grading operation: channel balance, saturation and luma curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ColorGrade {
    /// Red shift in the midtones (-1.0 to 1.0)
    pub red_midtones: f64,
    /// Blue shift in the midtones (-1.0 to 1.0)
    pub blue_midtones: f64,
    /// Saturation multiplier (1.0 = unchanged)
    pub saturation: f64,
    /// Luma transfer curve
    pub luma: LumaCurve,
}

/// Linear luma curve `y' = (y - pivot) * gain + pivot` on 8-bit values.
///
/// A pivot of 0 is a plain gain; a pivot of 128 is a contrast stretch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LumaCurve {
    pub gain: f64,
    pub pivot: f64,
}

impl LumaCurve {
    /// Apply the curve to one 8-bit luma value, clamped to 0..=255.
    pub fn apply(&self, value: f64) -> f64 {
        ((value - self.pivot) * self.gain + self.pivot).clamp(0.0, 255.0)
    }
}
