use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use crate::config::Config;
use super::{MediaCommandBuilder, MediaProber, VideoMetadata};

/// Frame rate assumed when the stream does not report a usable one.
const FALLBACK_FRAME_RATE: f64 = 30.0;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

/// ffprobe backed prober
pub struct FfprobeProber {
    config: Config,
    command_builder: MediaCommandBuilder,
}

impl FfprobeProber {
    pub fn new(config: Config) -> Self {
        let command_builder = MediaCommandBuilder::new(&config.media.ffprobe_path);
        Self {
            config,
            command_builder,
        }
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> VideoMetadata {
        if !self.config.is_supported_format(path) {
            return VideoMetadata::invalid(
                path,
                format!(
                    "Unsupported format: expected one of {}",
                    self.config.conversion.supported_formats.join(", ")
                ),
            );
        }

        if !path.is_file() {
            return VideoMetadata::invalid(path, format!("File not found: {}", path.display()));
        }

        let command = self.command_builder.probe(path);
        let metadata = match command.execute().await {
            Ok(output) if output.status.success() => parse_ffprobe_output(path, &output.stdout),
            Ok(output) => {
                debug!(
                    "ffprobe exited with {} for {}: {}",
                    output.status,
                    path.display(),
                    String::from_utf8_lossy(&output.stderr)
                );
                VideoMetadata::invalid(path, "FFprobe failed to analyze video")
            }
            Err(e) => VideoMetadata::invalid(path, format!("Failed to run ffprobe: {}", e)),
        };

        if metadata.valid {
            info!(
                "Probed {}: {:.1}s {} @ {:.2} fps",
                metadata.filename,
                metadata.duration_secs,
                metadata.resolution(),
                metadata.frame_rate
            );
        } else {
            info!(
                "Rejected {}: {}",
                metadata.filename,
                metadata.error.as_deref().unwrap_or_default()
            );
        }
        metadata
    }
}

/// Turn ffprobe's JSON into metadata, rejecting files without a usable video stream.
pub fn parse_ffprobe_output(path: &Path, stdout: &[u8]) -> VideoMetadata {
    let probe: ProbeOutput = match serde_json::from_slice(stdout) {
        Ok(p) => p,
        Err(e) => {
            return VideoMetadata::invalid(path, format!("Failed to parse ffprobe output: {}", e));
        }
    };

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let width = video.and_then(|s| s.width).unwrap_or(0);
    let height = video.and_then(|s| s.height).unwrap_or(0);
    let frame_rate = video
        .and_then(|s| s.r_frame_rate.as_deref())
        .map(parse_frame_rate)
        .unwrap_or(FALLBACK_FRAME_RATE);

    let duration_secs = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .unwrap_or(0.0);

    if width == 0 || height == 0 {
        return VideoMetadata::invalid(path, "Invalid video metadata: missing resolution");
    }
    if duration_secs <= 0.0 {
        return VideoMetadata::invalid(path, "Invalid video metadata: missing duration");
    }

    VideoMetadata::valid(path, duration_secs, width, height, frame_rate)
}

/// Parse a frame rate such as "30/1", "30000/1001" or "29.97".
pub fn parse_frame_rate(value: &str) -> f64 {
    let parsed = match value.split_once('/') {
        Some((num, den)) => {
            match (num.trim().parse::<f64>(), den.trim().parse::<f64>()) {
                (Ok(num), Ok(den)) if den > 0.0 => Some(num / den),
                _ => None,
            }
        }
        None => value.trim().parse::<f64>().ok(),
    };

    parsed
        .filter(|fps| fps.is_finite() && *fps > 0.0)
        .unwrap_or(FALLBACK_FRAME_RATE)
}
