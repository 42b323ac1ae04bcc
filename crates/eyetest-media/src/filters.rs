//! Transform chain construction.
//!
//! [`FilterChainBuilder`] validates a [`ProcessingConfig`] and resolves it
//! into a [`TransformRecipe`]; [`render_graph`] turns a recipe into the
//! `-filter_complex` graph handed to FFmpeg.

use tracing::debug;

use eyetest_models::{ConfigError, FrameSize, PixelRect, ProcessingConfig, Region};

use crate::coords;
use crate::error::{MediaError, MediaResult};
use crate::recipe::{Stage, TransformRecipe};
use crate::watermark;

/// Builds recipes for one output frame size.
#[derive(Debug, Clone)]
pub struct FilterChainBuilder<'a> {
    config: &'a ProcessingConfig,
    output: FrameSize,
}

impl<'a> FilterChainBuilder<'a> {
    pub fn new(config: &'a ProcessingConfig, output: FrameSize) -> Self {
        Self { config, output }
    }

    /// Validate the configuration and resolve it against `regions`.
    ///
    /// Every check happens here, so a returned recipe can be handed to
    /// the encoder without further validation.
    pub fn build(&self, regions: &[Region]) -> MediaResult<TransformRecipe> {
        let config = self.config;
        let preset = config.validate()?;

        if self.output.width < 2 || self.output.height < 2 {
            return Err(MediaError::InvalidVideo(format!(
                "output frame {}x{} is too small",
                self.output.width, self.output.height
            )));
        }
        if regions.len() > config.limits.max_regions {
            return Err(ConfigError::TooManyRegions {
                count: regions.len(),
                max: config.limits.max_regions,
            }
            .into());
        }
        if config.logo.enabled {
            watermark::check_logo(&config.logo.path)?;
        }

        let boxes = regions
            .iter()
            .map(|r| coords::resolve(r, self.output, config.mirror))
            .collect::<Result<Vec<_>, _>>()?;

        let mut stages = vec![
            Stage::Timing {
                speed: config.speed,
                trim_start_secs: config.trim_start_secs,
            },
            Stage::Color {
                preset,
                grade: preset.grade(),
            },
            Stage::Occlusion {
                edge_overlay: config.edge_overlay,
                boxes,
            },
            Stage::Zoom {
                factor: config.zoom,
                crop: zoom_crop(self.output, config.zoom),
                output: self.output,
            },
            Stage::Format {
                pixel_format: config.encoding.pixel_format.clone(),
            },
        ];
        if config.mirror {
            stages.push(Stage::Mirror);
        }
        if config.logo.enabled {
            stages.push(Stage::Watermark {
                logo: config.logo.path.clone(),
                height: config.logo.height,
                margin: config.logo.margin,
                opacity: config.logo.opacity,
                corner: config.logo.corner,
            });
        }

        let recipe = TransformRecipe::new(stages, self.output)?;
        debug!(
            preset = %preset,
            stages = recipe.stages().len(),
            regions = regions.len(),
            "Built transform recipe"
        );
        Ok(recipe)
    }
}

/// Centered crop covering `1/zoom` of the frame, with even dimensions.
pub fn zoom_crop(frame: FrameSize, zoom: f64) -> PixelRect {
    let shrink = |v: u32| {
        let scaled = (v as f64 / zoom.max(1.0) + 1e-9).floor() as u32;
        (scaled / 2 * 2).clamp(2.min(v), v)
    };
    let width = shrink(frame.width);
    let height = shrink(frame.height);
    PixelRect::new(
        (frame.width - width) / 2,
        (frame.height - height) / 2,
        width,
        height,
    )
}

/// Input stream indices of the encoder command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphInputs {
    /// Source video (and audio)
    pub source: usize,
    /// Raw gray overlay mask
    pub overlay: Option<usize>,
    /// Logo still image
    pub logo: Option<usize>,
    /// Whether the source has an audio stream
    pub audio: bool,
    pub mute_audio: bool,
}

impl GraphInputs {
    /// Standard layout: source first, then the overlay and the logo when present.
    pub fn for_recipe(recipe: &TransformRecipe, has_audio: bool, mute_audio: bool) -> Self {
        let mut next = 1;
        let mut take = |present: bool| {
            present.then(|| {
                let index = next;
                next += 1;
                index
            })
        };
        let overlay = take(recipe.uses_edge_overlay());
        let logo = take(recipe.logo().is_some());
        Self {
            source: 0,
            overlay,
            logo,
            audio: has_audio,
            mute_audio,
        }
    }
}

/// A rendered filter graph and the labels to map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterGraph {
    pub filter_complex: String,
    pub video_label: String,
    pub audio_label: Option<String>,
}

/// Accumulates linear filters and flushes them into labelled chains.
struct GraphWriter {
    segments: Vec<String>,
    pending: Vec<String>,
    current: String,
    counter: usize,
}

impl GraphWriter {
    fn new(input: String) -> Self {
        Self {
            segments: Vec::new(),
            pending: Vec::new(),
            current: input,
            counter: 0,
        }
    }

    fn push(&mut self, filter: impl Into<String>) {
        self.pending.push(filter.into());
    }

    fn next_label(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{}{}", prefix, self.counter)
    }

    /// Close the pending chain; returns the label carrying the main stream.
    fn flush(&mut self) -> String {
        if !self.pending.is_empty() {
            let label = self.next_label("v");
            self.segments.push(format!(
                "[{}]{}[{}]",
                self.current,
                self.pending.join(","),
                label
            ));
            self.pending.clear();
            self.current = label;
        }
        self.current.clone()
    }

    fn segment(&mut self, segment: String) {
        self.segments.push(segment);
    }

    fn finish(mut self) -> (String, String) {
        let label = self.flush();
        (self.segments.join(";"), label)
    }
}

fn num(value: f64) -> String {
    let s = format!("{:.6}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// Render `recipe` as an FFmpeg filter graph over `inputs`.
pub fn render_graph(recipe: &TransformRecipe, inputs: &GraphInputs) -> MediaResult<FilterGraph> {
    let out = recipe.output();
    let speed = recipe.speed();
    let mut graph = GraphWriter::new(format!("{}:v", inputs.source));

    for stage in recipe.stages() {
        match stage {
            Stage::Timing {
                speed,
                trim_start_secs,
            } => {
                if *trim_start_secs > 0.0 {
                    graph.push(format!("trim=start={}", num(*trim_start_secs)));
                }
                graph.push(format!("setpts=(PTS-STARTPTS)/{}", num(*speed)));
            }
            Stage::Color { grade, .. } => {
                graph.push(format!(
                    "colorbalance=rm={}:bm={}",
                    num(grade.red_midtones),
                    num(grade.blue_midtones)
                ));
                graph.push(format!("hue=s={}", num(grade.saturation)));
                graph.push(format!(
                    "lutyuv=y=(val-{})*{}+{}",
                    num(grade.luma.pivot),
                    num(grade.luma.gain),
                    num(grade.luma.pivot)
                ));
            }
            Stage::Mirror => graph.push("hflip"),
            Stage::Occlusion {
                edge_overlay,
                boxes,
            } => {
                if *edge_overlay {
                    let overlay = inputs.overlay.ok_or_else(|| {
                        MediaError::InvalidRecipe("edge overlay input missing".to_string())
                    })?;
                    let main = graph.flush();
                    let mask = graph.next_label("mask");
                    let white = graph.next_label("white");
                    let edges = graph.next_label("edges");
                    let composed = graph.next_label("v");

                    let mut mask_chain = vec![
                        "format=gray".to_string(),
                        format!("scale={}:{}", out.width, out.height),
                        format!("setpts=(PTS-STARTPTS)/{}", num(speed)),
                    ];
                    if recipe.is_mirrored() {
                        mask_chain.push("hflip".to_string());
                    }
                    graph.segment(format!("[{}:v]{}[{}]", overlay, mask_chain.join(","), mask));
                    graph.segment(format!(
                        "color=c=white:s={}x{},format=rgb24[{}]",
                        out.width, out.height, white
                    ));
                    graph.segment(format!("[{}][{}]alphamerge[{}]", white, mask, edges));
                    graph.segment(format!(
                        "[{}][{}]overlay=0:0:shortest=1[{}]",
                        main, edges, composed
                    ));
                    graph.current = composed;
                }
                for b in boxes {
                    graph.push(format!(
                        "drawbox=x={}:y={}:w={}:h={}:color=black:t=fill",
                        b.x, b.y, b.width, b.height
                    ));
                }
            }
            Stage::Zoom { crop, output, .. } => {
                graph.push(format!(
                    "crop={}:{}:{}:{}",
                    crop.width, crop.height, crop.x, crop.y
                ));
                graph.push(format!("scale={}:{}", output.width, output.height));
            }
            Stage::Format { pixel_format } => graph.push(format!("format={}", pixel_format)),
            Stage::Watermark {
                height,
                margin,
                opacity,
                corner,
                ..
            } => {
                let logo = inputs.logo.ok_or_else(|| {
                    MediaError::InvalidRecipe("logo input missing".to_string())
                })?;
                let main = graph.flush();
                let prepared = graph.next_label("logo");
                let composed = graph.next_label("v");
                graph.segment(format!(
                    "[{}:v]{}[{}]",
                    logo,
                    watermark::logo_chain(*height, *opacity),
                    prepared
                ));
                graph.segment(format!(
                    "[{}][{}]{}[{}]",
                    main,
                    prepared,
                    watermark::overlay_filter(*corner, *margin),
                    composed
                ));
                graph.current = composed;
            }
        }
    }

    let (mut filter_complex, video_label) = graph.finish();
    if filter_complex.is_empty() {
        filter_complex = format!("[{}:v]null[vout]", inputs.source);
        return Ok(FilterGraph {
            filter_complex,
            video_label: "vout".to_string(),
            audio_label: None,
        });
    }

    let audio_label = if inputs.audio {
        let chain = audio_chain(recipe, inputs.mute_audio);
        filter_complex.push_str(&format!(";[{}:a]{}[aout]", inputs.source, chain));
        Some("aout".to_string())
    } else {
        None
    };

    Ok(FilterGraph {
        filter_complex,
        video_label,
        audio_label,
    })
}

/// Audio filters keeping the track aligned with the re-timed video.
pub fn audio_chain(recipe: &TransformRecipe, mute: bool) -> String {
    let mut filters = Vec::new();
    let trim = recipe.trim_start_secs();
    if trim > 0.0 {
        filters.push(format!("atrim=start={}", num(trim)));
    }
    filters.push("asetpts=PTS-STARTPTS".to_string());
    if (recipe.speed() - 1.0).abs() > f64::EPSILON {
        filters.push(format!("atempo={}", num(recipe.speed())));
    }
    if mute {
        filters.push("volume=0".to_string());
    }
    filters.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::StageKind;
    use eyetest_models::{FilterPreset, LogoConfig};
    use tempfile::TempDir;

    fn config_without_logo() -> ProcessingConfig {
        ProcessingConfig {
            logo: LogoConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn full_hd() -> FrameSize {
        FrameSize::new(1920, 1080)
    }

    #[test]
    fn test_scenario_stage_order() {
        let dir = TempDir::new().unwrap();
        let logo = dir.path().join("logo.jpg");
        std::fs::write(&logo, b"\xff\xd8\xff").unwrap();

        let config = ProcessingConfig {
            speed: 1.12,
            zoom: 1.08,
            mirror: true,
            logo: LogoConfig {
                enabled: true,
                path: logo,
                ..Default::default()
            },
            ..Default::default()
        };
        let regions = [
            Region::new(0.1, 0.8, 0.3, 0.15).unwrap(),
            Region::new(0.6, 0.1, 0.2, 0.2).unwrap(),
        ];

        let recipe = FilterChainBuilder::new(&config, full_hd())
            .build(&regions)
            .unwrap();
        assert_eq!(
            recipe.kinds(),
            vec![
                StageKind::Timing,
                StageKind::Color,
                StageKind::Mirror,
                StageKind::Occlusion,
                StageKind::Zoom,
                StageKind::Format,
                StageKind::Watermark,
            ]
        );
        match recipe.get(StageKind::Occlusion) {
            Some(Stage::Occlusion { boxes, .. }) => {
                assert_eq!(boxes.len(), 2);
                // Insertion order preserved, first box mirrored
                assert_eq!(boxes[0], PixelRect::new(1152, 864, 576, 162));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cool_mirrored_box() {
        let config = ProcessingConfig {
            preset: "COOL".to_string(),
            mirror: true,
            ..config_without_logo()
        };
        let recipe = FilterChainBuilder::new(&config, full_hd())
            .build(&[Region::new(0.1, 0.8, 0.3, 0.15).unwrap()])
            .unwrap();
        match recipe.get(StageKind::Color) {
            Some(Stage::Color { preset, .. }) => assert_eq!(*preset, FilterPreset::Cool),
            other => panic!("unexpected {other:?}"),
        }
        let graph = render_graph(&recipe, &GraphInputs::for_recipe(&recipe, false, true)).unwrap();
        assert!(graph
            .filter_complex
            .contains("drawbox=x=1152:y=864:w=576:h=162:color=black:t=fill"));
    }

    #[test]
    fn test_speck_region_draws_one_pixel_box() {
        let config = config_without_logo();
        let regions = [
            Region::new(0.5, 0.5, 0.0002, 0.0002).unwrap(),
            Region::new(0.9999, 0.0, 0.0001, 0.0001).unwrap(),
        ];
        let recipe = FilterChainBuilder::new(&config, full_hd())
            .build(&regions)
            .unwrap();
        let graph = render_graph(&recipe, &GraphInputs::for_recipe(&recipe, false, true)).unwrap();

        // Mirrored: 1920 - (960 + 1)
        assert!(graph
            .filter_complex
            .contains("drawbox=x=959:y=540:w=1:h=1:color=black:t=fill"));
        let boxes: Vec<&str> = graph
            .filter_complex
            .split([',', ';'])
            .filter(|f| f.starts_with("drawbox="))
            .collect();
        assert_eq!(boxes.len(), 2);
        for b in boxes {
            assert!(!b.contains(":w=0:") && !b.contains(":h=0:"), "{b}");
        }
    }

    #[test]
    fn test_settings_json_cannot_widen_bounds() {
        let mut config: ProcessingConfig = serde_json::from_str(
            r#"{"speed": 50, "zoom": 40,
                "limits": {"max_speed": 100, "max_zoom": 100, "max_regions": 100}}"#,
        )
        .unwrap();
        config.logo = config_without_logo().logo;
        let err = FilterChainBuilder::new(&config, full_hd())
            .build(&[])
            .unwrap_err();
        assert!(matches!(err, MediaError::ConfigValidation(_)));
    }

    #[test]
    fn test_zero_regions_keeps_occlusion_stage() {
        let config = config_without_logo();
        let recipe = FilterChainBuilder::new(&config, full_hd()).build(&[]).unwrap();
        match recipe.get(StageKind::Occlusion) {
            Some(Stage::Occlusion { boxes, .. }) => assert!(boxes.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
        let graph = render_graph(&recipe, &GraphInputs::for_recipe(&recipe, true, true)).unwrap();
        assert!(!graph.filter_complex.contains("drawbox"));
    }

    #[test]
    fn test_order_independent_of_configuration() {
        let base = config_without_logo();
        let variants = [
            ProcessingConfig {
                mirror: false,
                ..base.clone()
            },
            ProcessingConfig {
                edge_overlay: false,
                zoom: 1.0,
                ..base.clone()
            },
            base,
        ];
        for config in &variants {
            let recipe = FilterChainBuilder::new(config, full_hd()).build(&[]).unwrap();
            let kinds = recipe.kinds();
            let mut sorted = kinds.clone();
            sorted.sort();
            assert_eq!(kinds, sorted);
            assert_eq!(kinds.contains(&StageKind::Mirror), config.mirror);
        }
    }

    #[test]
    fn test_validation_errors_surface_before_rendering() {
        let config = ProcessingConfig {
            preset: "SEPIA".to_string(),
            ..config_without_logo()
        };
        let err = FilterChainBuilder::new(&config, full_hd()).build(&[]).unwrap_err();
        assert!(matches!(
            err,
            MediaError::ConfigValidation(ConfigError::UnknownPreset(_))
        ));

        let config = ProcessingConfig {
            logo: LogoConfig {
                enabled: true,
                path: "/nonexistent/logo.jpg".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = FilterChainBuilder::new(&config, full_hd()).build(&[]).unwrap_err();
        assert!(matches!(
            err,
            MediaError::ConfigValidation(ConfigError::LogoMissing(_))
        ));

        let config = config_without_logo();
        let regions: Vec<Region> = (0..6)
            .map(|i| Region::new(i as f64 * 0.1, 0.0, 0.1, 0.1).unwrap())
            .collect();
        let err = FilterChainBuilder::new(&config, full_hd()).build(&regions).unwrap_err();
        assert!(matches!(
            err,
            MediaError::ConfigValidation(ConfigError::TooManyRegions { count: 6, max: 5 })
        ));
    }

    #[test]
    fn test_zoom_crop_is_centered_and_even() {
        let crop = zoom_crop(full_hd(), 1.08);
        assert_eq!(crop, PixelRect::new(72, 40, 1776, 1000));
        assert_eq!(zoom_crop(full_hd(), 1.0), PixelRect::new(0, 0, 1920, 1080));
    }

    #[test]
    fn test_render_without_overlay_or_logo() {
        let config = ProcessingConfig {
            mirror: false,
            edge_overlay: false,
            zoom: 1.0,
            speed: 1.0,
            ..config_without_logo()
        };
        let recipe = FilterChainBuilder::new(&config, FrameSize::new(1280, 720))
            .build(&[Region::new(0.0, 0.0, 0.5, 0.5).unwrap()])
            .unwrap();
        let graph = render_graph(&recipe, &GraphInputs::for_recipe(&recipe, true, true)).unwrap();
        assert_eq!(
            graph.filter_complex,
            "[0:v]setpts=(PTS-STARTPTS)/1,\
             colorbalance=rm=0.12:bm=-0.12,hue=s=1.3,lutyuv=y=(val-0)*1.3+0,\
             drawbox=x=0:y=0:w=640:h=360:color=black:t=fill,\
             crop=1280:720:0:0,scale=1280:720,format=yuv420p[v1];\
             [0:a]asetpts=PTS-STARTPTS,volume=0[aout]"
        );
        assert_eq!(graph.video_label, "v1");
        assert_eq!(graph.audio_label.as_deref(), Some("aout"));
    }

    #[test]
    fn test_render_full_graph_wires_overlay_and_logo() {
        let dir = TempDir::new().unwrap();
        let logo = dir.path().join("logo.jpg");
        std::fs::write(&logo, b"\xff\xd8\xff").unwrap();
        let config = ProcessingConfig {
            trim_start_secs: 4.0,
            logo: LogoConfig {
                enabled: true,
                path: logo,
                ..Default::default()
            },
            ..Default::default()
        };
        let recipe = FilterChainBuilder::new(&config, full_hd()).build(&[]).unwrap();
        let inputs = GraphInputs::for_recipe(&recipe, true, true);
        assert_eq!(inputs.overlay, Some(1));
        assert_eq!(inputs.logo, Some(2));

        let graph = render_graph(&recipe, &inputs).unwrap();
        let fc = &graph.filter_complex;
        assert!(fc.starts_with("[0:v]trim=start=4,setpts=(PTS-STARTPTS)/1.12,"));
        assert!(fc.contains("[1:v]format=gray,scale=1920:1080,setpts=(PTS-STARTPTS)/1.12,hflip[mask"));
        assert!(fc.contains("alphamerge"));
        assert!(fc.contains("[2:v]scale=-1:100,format=rgba,colorchannelmixer=aa=0.80[logo"));
        assert!(fc.contains("overlay=20:H-h-20:format=auto"));
        assert!(fc.contains("[0:a]atrim=start=4,asetpts=PTS-STARTPTS,atempo=1.12,volume=0[aout]"));

        // Mirror comes before the overlay composite, zoom after it
        let hflip = fc.find("hflip").unwrap();
        let composite = fc.find("overlay=0:0").unwrap();
        let crop = fc.find("crop=").unwrap();
        assert!(hflip < composite && composite < crop);
        assert!(fc.contains(&format!("[{}];[0:a]", graph.video_label)));
    }

    #[test]
    fn test_render_rejects_missing_inputs() {
        let config = config_without_logo();
        let recipe = FilterChainBuilder::new(&config, full_hd()).build(&[]).unwrap();
        let inputs = GraphInputs {
            source: 0,
            overlay: None,
            logo: None,
            audio: false,
            mute_audio: true,
        };
        assert!(matches!(
            render_graph(&recipe, &inputs),
            Err(MediaError::InvalidRecipe(_))
        ));
    }
}
