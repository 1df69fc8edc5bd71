// Media access layer
//
// This module hides the external tools behind two traits:
// - MediaProber: reads container/stream metadata (ffprobe)
// - TranscodeEngine: runs one time-remapping transcode (ffmpeg)
//
// Commands are assembled with the builders in `commands`.

pub mod commands;
pub mod metadata;
pub mod probe;
pub mod processor;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use commands::*;
pub use metadata::VideoMetadata;
pub use probe::FfprobeProber;
pub use processor::{FfmpegEngine, ProgressTracker};

use crate::cancel::CancelSignal;
use crate::config::Config;
use crate::error::Result;
use crate::job::{ConversionJob, SpeedMultiplier};

/// Reads metadata of a media file.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProber: Send + Sync {
    /// Never fails: problems are reported through `valid` and `error`.
    async fn probe(&self, path: &Path) -> VideoMetadata;
}

/// Everything an engine needs to convert one file.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub speed: SpeedMultiplier,
    /// Source duration from probing, 0 when unknown
    pub duration_secs: f64,
    /// Source frame rate from probing, 0 when unknown
    pub frame_rate: f64,
    pub total_frames: u64,
}

impl TranscodeRequest {
    pub fn for_job(job: &ConversionJob, hint: &VideoMetadata) -> Self {
        Self {
            input_path: job.source_path.clone(),
            output_path: job.output_path.clone(),
            speed: job.speed,
            duration_secs: hint.duration_secs,
            frame_rate: hint.frame_rate,
            total_frames: hint.total_frames,
        }
    }

    /// Approximate duration of the produced file.
    pub fn expected_output_duration(&self) -> f64 {
        self.speed.remapped_duration(self.duration_secs)
    }
}

/// Runs one external transcode.
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Convert `request`, sending fractional progress in [0, 1] when known.
    ///
    /// Progress is best effort: a full channel drops the update. The engine
    /// stops and returns `Cancelled` when `cancel` fires.
    async fn transcode(
        &self,
        request: &TranscodeRequest,
        progress: mpsc::Sender<f64>,
        cancel: CancelSignal,
    ) -> Result<()>;

    /// Check that the engine can be started.
    async fn check_availability(&self) -> Result<()>;

    /// First line of the engine's version banner.
    async fn get_version_info(&self) -> Result<String>;
}

/// Factory for the ffmpeg based implementations
pub struct MediaFactory;

impl MediaFactory {
    pub fn create_prober(config: &Config) -> Arc<dyn MediaProber> {
        Arc::new(FfprobeProber::new(config.clone()))
    }

    pub fn create_engine(config: &Config) -> Arc<dyn TranscodeEngine> {
        Arc::new(FfmpegEngine::new(config.media.clone()))
    }
}
