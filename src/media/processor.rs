use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::config::MediaConfig;
use crate::error::{Result, TimelapseError};
use super::{MediaCommandBuilder, TranscodeEngine, TranscodeRequest};

/// Lines of ffmpeg's stderr kept for failure diagnostics.
const DIAGNOSTIC_LINES: usize = 20;

/// Turns ffmpeg `-progress` lines into a fraction of the source processed.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    speed: f64,
    duration_us: f64,
    expected_frames: f64,
}

impl ProgressTracker {
    pub fn new(request: &TranscodeRequest) -> Self {
        let speed = request.speed.get() as f64;
        Self {
            speed,
            duration_us: request.duration_secs.max(0.0) * 1_000_000.0,
            expected_frames: request.total_frames as f64 / speed,
        }
    }

    /// Fraction in [0, 1] for lines that carry progress, `None` otherwise.
    ///
    /// `out_time_*` is measured on the output timeline, so it is scaled back
    /// up by the speed multiplier. Without a known duration the output frame
    /// count against the expected frame count is used instead.
    pub fn update(&self, line: &str) -> Option<f64> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();

        match key {
            // ffmpeg reports both in microseconds
            "out_time_us" | "out_time_ms" if self.duration_us > 0.0 => {
                let out_us = value.parse::<f64>().ok()?;
                Some((out_us * self.speed / self.duration_us).clamp(0.0, 1.0))
            }
            "frame" if self.duration_us <= 0.0 && self.expected_frames >= 1.0 => {
                let frames = value.parse::<f64>().ok()?;
                Some((frames / self.expected_frames).clamp(0.0, 1.0))
            }
            "progress" if value == "end" => Some(1.0),
            _ => None,
        }
    }
}

/// ffmpeg backed transcode engine
pub struct FfmpegEngine {
    config: MediaConfig,
    command_builder: MediaCommandBuilder,
}

impl FfmpegEngine {
    pub fn new(config: MediaConfig) -> Self {
        let command_builder = MediaCommandBuilder::new(&config.ffmpeg_path);
        Self {
            config,
            command_builder,
        }
    }
}

#[async_trait]
impl TranscodeEngine for FfmpegEngine {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn transcode(
        &self,
        request: &TranscodeRequest,
        progress: mpsc::Sender<f64>,
        mut cancel: CancelSignal,
    ) -> Result<()> {
        info!(
            "Converting {} -> {} at {}",
            request.input_path.display(),
            request.output_path.display(),
            request.speed
        );

        let command = self.command_builder.timelapse(request, &self.config);
        let mut child = command.spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| {
            TimelapseError::Conversion("Failed to capture ffmpeg progress output".to_string())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            TimelapseError::Conversion("Failed to capture ffmpeg error output".to_string())
        })?;

        let diagnostics = tokio::spawn(collect_diagnostics(stderr));
        let tracker = ProgressTracker::new(request);
        let mut lines = BufReader::new(stdout).lines();

        let status = loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if let Some(fraction) = tracker.update(&line) {
                            // Best effort: drop the update when the consumer is behind
                            let _ = progress.try_send(fraction);
                        }
                    }
                    None => break child.wait().await?,
                },
                _ = cancel.cancelled() => {
                    warn!("Cancelling conversion of {}", request.input_path.display());
                    if let Err(e) = child.kill().await {
                        warn!("Failed to stop ffmpeg: {}", e);
                    }
                    return Err(TimelapseError::Cancelled);
                }
            }
        };

        let stderr_tail = diagnostics.await.unwrap_or_default();

        if !status.success() {
            let mut reason = format!("FFmpeg exited with {}", status);
            if !stderr_tail.is_empty() {
                reason.push_str(": ");
                reason.push_str(&stderr_tail);
            }
            return Err(TimelapseError::Conversion(reason));
        }

        debug!("ffmpeg finished {}", request.output_path.display());
        Ok(())
    }

    async fn check_availability(&self) -> Result<()> {
        let output = self
            .command_builder
            .version_check()
            .execute()
            .await
            .map_err(|e| TimelapseError::Conversion(format!("FFmpeg not found: {}", e)))?;

        if output.status.success() {
            info!("FFmpeg is available");
            Ok(())
        } else {
            Err(TimelapseError::Conversion("FFmpeg version check failed".to_string()))
        }
    }

    async fn get_version_info(&self) -> Result<String> {
        debug!("Getting ffmpeg version information");

        let output = self.command_builder.version_check().execute().await?;

        if output.status.success() {
            let version_info = String::from_utf8_lossy(&output.stdout);
            // The first line carries the version
            let first_line = version_info.lines().next().unwrap_or("Unknown version");
            Ok(first_line.to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(TimelapseError::Conversion(format!("FFmpeg version check failed: {}", stderr)))
        }
    }
}

/// Keep the last lines ffmpeg printed on stderr.
async fn collect_diagnostics<R: AsyncRead + Unpin>(stderr: R) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail: VecDeque<String> = VecDeque::with_capacity(DIAGNOSTIC_LINES);

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if tail.len() == DIAGNOSTIC_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    Vec::from(tail).join("\n")
}
