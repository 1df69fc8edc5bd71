use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::error::{Result, TimelapseError};

// Default values for optional configuration fields
fn default_log_level() -> String {
    "error".to_string()
}

fn default_progress_interval_ms() -> u64 {
    250
}

fn default_event_buffer() -> usize {
    32
}

fn default_probe_concurrency() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub media: MediaConfig,
    pub output: OutputConfig,
    pub conversion: ConversionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub ffmpeg_path: String,
    /// Path to ffprobe binary
    pub ffprobe_path: String,
    /// Video encoder passed to `-c:v`
    pub video_codec: String,
    /// Encoder preset (ultrafast, fast, medium, slow, veryslow)
    pub preset: String,
    /// Constant rate factor (0-51, lower = better quality)
    pub crf: u8,
    /// ffmpeg `-loglevel`; anything printed at this level ends up in failure diagnostics
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Additional encoding options appended before the output path
    /// Common options: ["-pix_fmt", "yuv420p", "-movflags", "+faststart"]
    #[serde(default)]
    pub extra_options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Prefix prepended to the source file stem
    pub prefix: String,
    /// Container extension of converted files
    pub extension: String,
    /// Write all outputs here instead of next to their source
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionConfig {
    /// Speed multipliers offered to the user
    pub allowed_speeds: Vec<u32>,
    /// Accepted input container extensions (lowercase, without dot)
    pub supported_formats: Vec<String>,
    /// Minimum delay between two "converting" progress events
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    /// Capacity of the progress event channel before coalescing kicks in
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// Number of files probed at the same time
    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            media: MediaConfig {
                ffmpeg_path: "ffmpeg".to_string(),
                ffprobe_path: "ffprobe".to_string(),
                video_codec: "libx264".to_string(),
                preset: "fast".to_string(),
                crf: 23,
                log_level: default_log_level(),
                extra_options: vec![
                    // Example encoding options users can customize:
                    // "-pix_fmt".to_string(), "yuv420p".to_string(), // Pixel format for compatibility
                ],
            },
            output: OutputConfig {
                prefix: "timelapse-".to_string(),
                extension: "mp4".to_string(),
                directory: None,
            },
            conversion: ConversionConfig {
                allowed_speeds: vec![5, 10, 50, 100, 200, 300, 500, 1000],
                supported_formats: [
                    "mp4", "webm", "mpg", "avi", "mov", "m4v", "flv", "mkv", "wmv", "3gp",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
                progress_interval_ms: default_progress_interval_ms(),
                event_buffer: default_event_buffer(),
                probe_concurrency: default_probe_concurrency(),
            },
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TimelapseError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| TimelapseError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| TimelapseError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| TimelapseError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Reject settings the orchestrator cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.conversion.allowed_speeds.is_empty() {
            return Err(TimelapseError::Config("allowed_speeds must not be empty".to_string()));
        }

        if let Some(speed) = self.conversion.allowed_speeds.iter().find(|s| **s <= 1) {
            return Err(TimelapseError::Config(format!(
                "allowed speed {} must be greater than 1",
                speed
            )));
        }

        if self.output.extension.trim().is_empty() {
            return Err(TimelapseError::Config("output extension must not be empty".to_string()));
        }

        if self.output.prefix.is_empty() && self.output.directory.is_none() {
            return Err(TimelapseError::Config(
                "an empty output prefix requires an output directory".to_string(),
            ));
        }

        if self.conversion.event_buffer == 0 || self.conversion.probe_concurrency == 0 {
            return Err(TimelapseError::Config(
                "event_buffer and probe_concurrency must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether the path carries one of the configured container extensions.
    pub fn is_supported_format<P: AsRef<Path>>(&self, path: P) -> bool {
        path.as_ref()
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| self.conversion.supported_formats.iter().any(|f| *f == ext))
    }
}
