//! End-to-end job pipeline.
//!
//! A job runs these steps in order, and any failure before the encoder
//! starts leaves nothing behind:
//!
//! 1. preflight disk check
//! 2. probe the source and pick the video codec
//! 3. build the transform recipe (all validation happens here)
//! 4. reserve the orchestrator's job slot and create the scratch directory
//! 5. generate the edge overlay on a blocking thread
//! 6. encode, forwarding cancellation and progress

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::Instrument;

use eyetest_media::fs_utils::format_size;
use eyetest_media::{
    detect_video_codec, ensure_disk_space, find_ffmpeg, find_ffprobe, output_path_for,
    probe_video, render_graph, write_overlay, EdgeOverlayGenerator, EncodeJob,
    EncodeOrchestrator, FilterChainBuilder, FilterGraph, GraphInputs, MediaError, MediaResult,
    OrchestratorOptions, OverlayArtifact, ScratchDir, TransformRecipe, VideoFrameSource,
    VideoInfo,
};
use eyetest_media::frames::processing_size;
use eyetest_models::{EdgeParams, EncodingConfig, FrameSize, JobId, ProcessingConfig, Region};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;

/// File name of the overlay artifact inside the scratch directory.
const OVERLAY_FILE: &str = "edges.gray";

/// One clip to process.
#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub source: PathBuf,
    pub regions: Vec<Region>,
    pub config: ProcessingConfig,
}

/// Everything decided before any work starts.
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub job_id: JobId,
    pub info: VideoInfo,
    pub encoding: EncodingConfig,
    pub recipe: Arc<TransformRecipe>,
    pub graph: FilterGraph,
    pub destination: PathBuf,
}

/// Summary of a finished job.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub source: PathBuf,
    pub output: PathBuf,
    pub size_bytes: u64,
    pub codec: String,
    pub overlay_frames: Option<u64>,
    pub recipe: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Runs jobs against one FFmpeg installation.
pub struct Pipeline {
    config: WorkerConfig,
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    orchestrator: EncodeOrchestrator,
}

impl Pipeline {
    /// Locate FFmpeg and FFprobe and set up the orchestrator.
    pub fn new(config: WorkerConfig) -> WorkerResult<Self> {
        let ffmpeg = find_ffmpeg(config.ffmpeg_path.as_deref())?;
        let ffprobe = find_ffprobe(&ffmpeg)?;
        Ok(Self::with_binaries(config, ffmpeg, ffprobe))
    }

    pub fn with_binaries(config: WorkerConfig, ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        let orchestrator = EncodeOrchestrator::new(
            &ffmpeg,
            OrchestratorOptions {
                cancel_grace: config.cancel_grace,
                timeout_secs: Some(config.job_timeout.as_secs()).filter(|s| *s > 0),
                retain_failed: config.retain_failed_scratch,
            },
        );
        tracing::info!(
            ffmpeg = %ffmpeg.display(),
            ffprobe = %ffprobe.display(),
            "Pipeline ready"
        );
        Self {
            config,
            ffmpeg,
            ffprobe,
            orchestrator,
        }
    }

    pub fn ffmpeg(&self) -> &Path {
        &self.ffmpeg
    }

    /// Probe the source and build the recipe without touching the filesystem.
    pub async fn plan(&self, request: &ProcessRequest) -> WorkerResult<JobPlan> {
        let info = probe_video(&self.ffprobe, &request.source).await?;
        if info.duration > 0.0 && request.config.trim_start_secs >= info.duration {
            return Err(WorkerError::config_error(format!(
                "trim start {:.3}s is past the end of a {:.3}s source",
                request.config.trim_start_secs, info.duration
            )));
        }

        let mut config = request.config.clone();
        config.encoding.codec = detect_video_codec(&self.ffmpeg).await;
        let preset = config.validate()?;

        let recipe = FilterChainBuilder::new(&config, info.frame_size()).build(&request.regions)?;
        let graph = render_graph(
            &recipe,
            &GraphInputs::for_recipe(&recipe, info.has_audio, config.encoding.mute_audio),
        )?;

        Ok(JobPlan {
            job_id: JobId::new(),
            destination: output_path_for(&request.source, &self.config.output_dir, preset),
            encoding: config.encoding,
            recipe: Arc::new(recipe),
            graph,
            info,
        })
    }

    /// Run one job to completion.
    ///
    /// Setting `cancel` to `true` stops the job at any step. `on_progress`
    /// receives the encoder's progress fraction.
    pub async fn process<F>(
        &self,
        request: ProcessRequest,
        cancel: watch::Receiver<bool>,
        on_progress: F,
    ) -> WorkerResult<JobReport>
    where
        F: FnMut(f64) + Send + 'static,
    {
        let started_at = Utc::now();

        ensure_disk_space(&self.config.output_dir, self.config.min_free_disk_bytes)?;
        let plan = self.plan(&request).await?;
        let logger = JobLogger::new(&plan.job_id, "plan");
        logger.log_completion(&format!(
            "{}x{} {:.1}s, codec {}, {} stage(s) -> {}",
            plan.info.width,
            plan.info.height,
            plan.info.duration,
            plan.encoding.codec,
            plan.recipe.stages().len(),
            plan.destination.display()
        ));

        let slot = self.orchestrator.try_reserve()?;
        let scratch = ScratchDir::create(&self.config.scratch_root, &plan.job_id)?;

        let overlay = if plan.recipe.uses_edge_overlay() {
            let logger = logger.step("overlay");
            let size = processing_size(plan.info.frame_size(), self.config.overlay_max_height);
            logger.log_start(&format!("{}x{} edge mask", size.width, size.height));
            let artifact = self
                .generate_overlay(
                    &request,
                    &plan,
                    size,
                    scratch.file(OVERLAY_FILE),
                    cancel.clone(),
                )
                .instrument(logger.create_span())
                .await
                .inspect_err(|e| logger.log_error(&e.to_string()))?;
            logger.log_completion(&format!("{} frames", artifact.frame_count));
            Some(artifact)
        } else {
            None
        };
        let overlay_frames = overlay.as_ref().map(|a| a.frame_count);

        let job = EncodeJob {
            id: plan.job_id.clone(),
            source: request.source.clone(),
            overlay,
            recipe: plan.recipe.clone(),
            encoding: plan.encoding.clone(),
            has_audio: plan.info.has_audio,
            source_duration_secs: plan.info.duration,
            destination: plan.destination.clone(),
            scratch,
        };

        let logger = logger.step("encode");
        logger.log_start(&plan.encoding.codec);
        let handle = self.orchestrator.spawn(slot, job);

        let canceller = handle.cancel_handle();
        let mut cancel = cancel;
        let forward_cancel = tokio::spawn(async move {
            if cancel.wait_for(|c| *c).await.is_ok() {
                canceller.cancel();
            }
        });

        let mut progress = handle.progress();
        let progress_logger = logger.clone();
        let mut on_progress = on_progress;
        let forward_progress = tokio::spawn(async move {
            let mut logged_decile = 0;
            while progress.changed().await.is_ok() {
                let fraction = *progress.borrow_and_update();
                on_progress(fraction);
                let decile = (fraction * 10.0).floor() as i32;
                if decile > logged_decile {
                    logged_decile = decile;
                    progress_logger.log_progress(fraction);
                }
            }
        });

        let result = handle.wait().await;
        forward_cancel.abort();
        let _ = forward_progress.await;

        let success = result.inspect_err(|e| {
            if e.is_cancelled() {
                logger.log_warning("cancelled");
            } else {
                logger.log_error(&e.to_string());
            }
        })?;
        logger.log_completion(&format!(
            "{} written to {}",
            format_size(success.size_bytes),
            success.output.display()
        ));

        Ok(JobReport {
            job_id: plan.job_id,
            source: request.source,
            output: success.output,
            size_bytes: success.size_bytes,
            codec: plan.encoding.codec,
            overlay_frames,
            recipe: plan.recipe.to_string(),
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn generate_overlay(
        &self,
        request: &ProcessRequest,
        plan: &JobPlan,
        size: FrameSize,
        path: PathBuf,
        cancel: watch::Receiver<bool>,
    ) -> MediaResult<OverlayArtifact> {
        let source = VideoFrameSource::new(&self.ffmpeg, &request.source, size)
            .with_trim_start(plan.recipe.trim_start_secs());
        let params = request.config.edge.clone();
        let fps = plan.info.fps;

        tokio::task::spawn_blocking(move || build_overlay(&source, params, &path, fps, cancel))
            .await
            .map_err(|e| MediaError::internal(format!("overlay task failed: {}", e)))?
    }
}

fn build_overlay(
    source: &VideoFrameSource,
    params: EdgeParams,
    path: &Path,
    fps: f64,
    cancel: watch::Receiver<bool>,
) -> MediaResult<OverlayArtifact> {
    let generator = EdgeOverlayGenerator::new(params)?;
    let frames = generator.generate(source)?;
    let artifact = write_overlay(frames, path, fps, || *cancel.borrow())?;
    if artifact.frame_count == 0 {
        let _ = std::fs::remove_file(path);
        return Err(MediaError::InvalidVideo(
            "no frames decoded for the edge overlay".to_string(),
        ));
    }
    Ok(artifact)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use eyetest_models::LogoConfig;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tempfile::TempDir;

    const PROBE_JSON: &str = r#"{"streams":[{"codec_type":"video","codec_name":"h264","width":64,"height":36,"avg_frame_rate":"25/1"},{"codec_type":"audio","codec_name":"aac"}],"format":{"duration":"2.0","size":"1000"}}"#;

    /// Two 64x36 rgb24 frames.
    const DECODE_BYTES: usize = 2 * 64 * 36 * 3;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Fake ffmpeg answering the encoder listing, the frame decoder and the encode.
    fn fake_ffmpeg(dir: &Path, has_x264: bool, encode: &str) -> PathBuf {
        let listing = if has_x264 {
            " V....D libx264              H.264 / AVC\n V....D mpeg4  MPEG-4 part 2"
        } else {
            " V....D mpeg4                MPEG-4 part 2"
        };
        script(
            dir,
            "ffmpeg",
            &format!(
                "case \" $* \" in\n\
                 *\" -encoders \"*) printf '%s\\n' '{listing}' ;;\n\
                 *\" -filter_complex \"*) for out; do :; done\n{encode} ;;\n\
                 *) head -c {DECODE_BYTES} /dev/zero ;;\n\
                 esac"
            ),
        )
    }

    struct Fixture {
        dir: TempDir,
        pipeline: Pipeline,
    }

    impl Fixture {
        fn new(has_x264: bool, encode: &str, configure: impl FnOnce(&mut WorkerConfig)) -> Self {
            let dir = TempDir::new().unwrap();
            let ffmpeg = fake_ffmpeg(dir.path(), has_x264, encode);
            let ffprobe = script(dir.path(), "ffprobe", &format!("echo '{PROBE_JSON}'"));
            std::fs::write(dir.path().join("derby.mp4"), b"source").unwrap();
            std::fs::write(dir.path().join("logo.png"), b"logo").unwrap();

            let mut config = WorkerConfig {
                scratch_root: dir.path().join("scratch"),
                output_dir: dir.path().join("out"),
                cancel_grace: Duration::from_millis(500),
                min_free_disk_bytes: 0,
                ..Default::default()
            };
            configure(&mut config);
            let pipeline = Pipeline::with_binaries(config, ffmpeg, ffprobe);
            Self { dir, pipeline }
        }

        fn request(&self, regions: Vec<Region>) -> ProcessRequest {
            ProcessRequest {
                source: self.dir.path().join("derby.mp4"),
                regions,
                config: ProcessingConfig {
                    logo: LogoConfig {
                        path: self.dir.path().join("logo.png"),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            }
        }

        fn scratch_entries(&self) -> usize {
            std::fs::read_dir(self.dir.path().join("scratch"))
                .map(|entries| entries.count())
                .unwrap_or(0)
        }
    }

    fn not_cancelled() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        // Receivers see the last value after the sender is gone
        drop(tx);
        rx
    }

    #[tokio::test]
    async fn test_plan_picks_codec_and_destination() {
        let fx = Fixture::new(false, "exit 0", |_| {});
        let request = fx.request(vec![Region::new(0.5, 0.5, 0.2, 0.1).unwrap()]);
        let plan = fx.pipeline.plan(&request).await.unwrap();

        assert_eq!(plan.encoding.codec, "mpeg4");
        assert_eq!(plan.info.frame_size(), FrameSize::new(64, 36));
        assert_eq!(
            plan.destination,
            fx.dir.path().join("out").join("derby_eyetest_warm.mp4")
        );
        assert_eq!(plan.graph.audio_label.as_deref(), Some("aout"));
        assert!(plan.graph.filter_complex.contains("[1:v]format=gray"));
        assert!(plan.graph.filter_complex.contains("[2:v]scale=-1:100"));
        assert_eq!(fx.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn test_process_writes_output_and_cleans_scratch() {
        let fx = Fixture::new(true, "printf encoded > \"$out\"", |_| {});
        let request = fx.request(vec![Region::new(0.1, 0.1, 0.2, 0.2).unwrap()]);

        let report = fx
            .pipeline
            .process(request, not_cancelled(), |_| {})
            .await
            .unwrap();

        assert_eq!(report.codec, "libx264");
        assert_eq!(report.overlay_frames, Some(2));
        assert_eq!(report.size_bytes, 7);
        assert_eq!(std::fs::read(&report.output).unwrap(), b"encoded");
        assert!(report.recipe.starts_with("1. timing"));
        assert!(report.finished_at >= report.started_at);
        assert_eq!(fx.scratch_entries(), 0);
    }

    #[tokio::test]
    async fn test_invalid_settings_fail_before_any_work() {
        let fx = Fixture::new(true, "exit 0", |_| {});
        let mut request = fx.request(vec![]);
        request.config.speed = 3.0;

        let err = fx
            .pipeline
            .process(request, not_cancelled(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Media(MediaError::ConfigValidation(_)) | WorkerError::Settings(_)
        ));
        assert!(!fx.dir.path().join("scratch").exists());
    }

    #[tokio::test]
    async fn test_trim_past_end_rejected() {
        let fx = Fixture::new(true, "exit 0", |_| {});
        let mut request = fx.request(vec![]);
        request.config.trim_start_secs = 5.0;
        assert!(matches!(
            fx.pipeline.plan(&request).await,
            Err(WorkerError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_disk_preflight() {
        let fx = Fixture::new(true, "exit 0", |c| c.min_free_disk_bytes = u64::MAX);
        let err = fx
            .pipeline
            .process(fx.request(vec![]), not_cancelled(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkerError::Media(MediaError::ResourceLimit(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_during_encode() {
        let fx = Fixture::new(true, "exec sleep 30", |_| {});
        let (tx, rx) = watch::channel(false);
        let request = fx.request(vec![]);

        let cancel_later = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            tx.send_replace(true);
            tx
        });
        let err = fx.pipeline.process(request, rx, |_| {}).await.unwrap_err();
        let _tx = cancel_later.await.unwrap();

        assert!(err.is_cancelled());
        assert_eq!(fx.scratch_entries(), 0);
        assert!(!fx.dir.path().join("out").join("derby_eyetest_warm.mp4").exists());
    }
}
