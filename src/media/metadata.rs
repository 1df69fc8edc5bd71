use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::job::display_name;

/// Validated description of one input file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub path: PathBuf,
    pub filename: String,
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub frame_rate: f64,
    pub total_frames: u64,
    pub valid: bool,
    pub error: Option<String>,
}

impl VideoMetadata {
    /// Metadata of a usable file; `total_frames` is derived from duration and frame rate.
    pub fn valid(path: &Path, duration_secs: f64, width: u32, height: u32, frame_rate: f64) -> Self {
        Self {
            path: path.to_path_buf(),
            filename: display_name(path),
            duration_secs,
            width,
            height,
            frame_rate,
            total_frames: (duration_secs * frame_rate).round() as u64,
            valid: true,
            error: None,
        }
    }

    /// Metadata of a rejected file. Numeric fields are all zero.
    pub fn invalid(path: &Path, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            path: path.to_path_buf(),
            filename: display_name(path),
            duration_secs: 0.0,
            width: 0,
            height: 0,
            frame_rate: 0.0,
            total_frames: 0,
            valid: false,
            error: Some(if error.is_empty() {
                "Invalid video".to_string()
            } else {
                error
            }),
        }
    }

    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}
