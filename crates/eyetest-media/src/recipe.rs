//! Ordered transform recipe consumed by the encoder.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

use eyetest_models::{ColorGrade, Corner, FilterPreset, FrameSize, PixelRect};

use crate::error::{MediaError, MediaResult};

/// Stage kinds in canonical application order.
///
/// The derived `Ord` is the order stages are applied in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Timing,
    Color,
    Mirror,
    Occlusion,
    Zoom,
    Format,
    Watermark,
}

impl StageKind {
    pub const ALL: &'static [StageKind] = &[
        StageKind::Timing,
        StageKind::Color,
        StageKind::Mirror,
        StageKind::Occlusion,
        StageKind::Zoom,
        StageKind::Format,
        StageKind::Watermark,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Timing => "timing",
            StageKind::Color => "color",
            StageKind::Mirror => "mirror",
            StageKind::Occlusion => "occlusion",
            StageKind::Zoom => "zoom",
            StageKind::Format => "format",
            StageKind::Watermark => "watermark",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transform with fully resolved parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    /// Skip the first seconds, then re-time by the speed multiplier
    Timing { speed: f64, trim_start_secs: f64 },
    Color { preset: FilterPreset, grade: ColorGrade },
    Mirror,
    /// Edge overlay composite, then one opaque box per region in draw order
    Occlusion {
        edge_overlay: bool,
        boxes: Vec<PixelRect>,
    },
    /// Centered crop, rescaled back to the output size
    Zoom {
        factor: f64,
        crop: PixelRect,
        output: FrameSize,
    },
    Format { pixel_format: String },
    Watermark {
        logo: PathBuf,
        height: u32,
        margin: u32,
        opacity: f64,
        corner: Corner,
    },
}

impl Stage {
    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Timing { .. } => StageKind::Timing,
            Stage::Color { .. } => StageKind::Color,
            Stage::Mirror => StageKind::Mirror,
            Stage::Occlusion { .. } => StageKind::Occlusion,
            Stage::Zoom { .. } => StageKind::Zoom,
            Stage::Format { .. } => StageKind::Format,
            Stage::Watermark { .. } => StageKind::Watermark,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind())?;
        match self {
            Stage::Timing {
                speed,
                trim_start_secs,
            } => write!(f, " speed={:.2} trim_start={:.3}s", speed, trim_start_secs),
            Stage::Color { preset, grade } => write!(
                f,
                " preset={} red={:+.2} blue={:+.2} saturation={:.2} luma_gain={:.2} luma_pivot={:.0}",
                preset,
                grade.red_midtones,
                grade.blue_midtones,
                grade.saturation,
                grade.luma.gain,
                grade.luma.pivot
            ),
            Stage::Mirror => Ok(()),
            Stage::Occlusion {
                edge_overlay,
                boxes,
            } => {
                write!(f, " edge_overlay={} boxes={}", edge_overlay, boxes.len())?;
                for b in boxes {
                    write!(f, " [{},{} {}x{}]", b.x, b.y, b.width, b.height)?;
                }
                Ok(())
            }
            Stage::Zoom {
                factor,
                crop,
                output,
            } => write!(
                f,
                " factor={:.2} crop={}x{}+{}+{} output={}x{}",
                factor, crop.width, crop.height, crop.x, crop.y, output.width, output.height
            ),
            Stage::Format { pixel_format } => write!(f, " pix_fmt={}", pixel_format),
            Stage::Watermark {
                logo,
                height,
                margin,
                opacity,
                corner,
            } => write!(
                f,
                " logo={} height={} margin={} opacity={:.2} corner={:?}",
                logo.display(),
                height,
                margin,
                opacity,
                corner
            ),
        }
    }
}

/// An immutable, canonically ordered list of stages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformRecipe {
    stages: Vec<Stage>,
    output: FrameSize,
}

impl TransformRecipe {
    /// Sort `stages` into canonical order.
    ///
    /// Fails if a stage kind appears more than once.
    pub fn new(mut stages: Vec<Stage>, output: FrameSize) -> MediaResult<Self> {
        stages.sort_by_key(Stage::kind);
        if let Some(pair) = stages.windows(2).find(|w| w[0].kind() == w[1].kind()) {
            return Err(MediaError::InvalidRecipe(format!(
                "duplicate {} stage",
                pair[0].kind()
            )));
        }
        Ok(Self { stages, output })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn kinds(&self) -> Vec<StageKind> {
        self.stages.iter().map(Stage::kind).collect()
    }

    pub fn get(&self, kind: StageKind) -> Option<&Stage> {
        self.stages.iter().find(|s| s.kind() == kind)
    }

    /// Nominal output frame size.
    pub fn output(&self) -> FrameSize {
        self.output
    }

    /// Playback speed multiplier (1.0 without a timing stage).
    pub fn speed(&self) -> f64 {
        match self.get(StageKind::Timing) {
            Some(Stage::Timing { speed, .. }) => *speed,
            _ => 1.0,
        }
    }

    pub fn trim_start_secs(&self) -> f64 {
        match self.get(StageKind::Timing) {
            Some(Stage::Timing {
                trim_start_secs, ..
            }) => *trim_start_secs,
            _ => 0.0,
        }
    }

    pub fn is_mirrored(&self) -> bool {
        self.get(StageKind::Mirror).is_some()
    }

    /// Whether the occlusion stage composites an edge overlay.
    pub fn uses_edge_overlay(&self) -> bool {
        matches!(
            self.get(StageKind::Occlusion),
            Some(Stage::Occlusion {
                edge_overlay: true,
                ..
            })
        )
    }

    /// Logo path, when a watermark stage is present.
    pub fn logo(&self) -> Option<&PathBuf> {
        match self.get(StageKind::Watermark) {
            Some(Stage::Watermark { logo, .. }) => Some(logo),
            _ => None,
        }
    }
}

impl fmt::Display for TransformRecipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}. {}", i + 1, stage)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> FrameSize {
        FrameSize::new(1920, 1080)
    }

    #[test]
    fn test_stages_are_sorted_canonically() {
        let stages = vec![
            Stage::Format {
                pixel_format: "yuv420p".into(),
            },
            Stage::Mirror,
            Stage::Timing {
                speed: 1.1,
                trim_start_secs: 0.0,
            },
            Stage::Occlusion {
                edge_overlay: false,
                boxes: vec![],
            },
        ];
        let recipe = TransformRecipe::new(stages, output()).unwrap();
        assert_eq!(
            recipe.kinds(),
            vec![
                StageKind::Timing,
                StageKind::Mirror,
                StageKind::Occlusion,
                StageKind::Format
            ]
        );
        assert!(recipe.is_mirrored());
        assert!((recipe.speed() - 1.1).abs() < 1e-12);
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let err = TransformRecipe::new(vec![Stage::Mirror, Stage::Mirror], output()).unwrap_err();
        assert!(matches!(err, MediaError::InvalidRecipe(_)));
        assert!(err.to_string().contains("mirror"));
    }

    #[test]
    fn test_display_lists_stages_in_order() {
        let recipe = TransformRecipe::new(
            vec![
                Stage::Mirror,
                Stage::Timing {
                    speed: 1.12,
                    trim_start_secs: 5.0,
                },
            ],
            output(),
        )
        .unwrap();
        assert_eq!(
            recipe.to_string(),
            "1. timing speed=1.12 trim_start=5.000s\n2. mirror"
        );
    }

    #[test]
    fn test_kind_order_is_total() {
        let mut kinds = StageKind::ALL.to_vec();
        kinds.reverse();
        kinds.sort();
        assert_eq!(kinds, StageKind::ALL);
    }
}
