use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::error::{Result, TimelapseError};
use crate::job::SpeedMultiplier;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show metadata of video files without converting them
    Probe {
        /// Video files or directories containing videos
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Convert video files into timelapses
    Convert {
        /// Video files or directories containing videos
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Speed multiplier, e.g. 10 or 10x
        #[arg(short, long, default_value = "10x", value_parser = parse_speed)]
        speed: u32,

        /// Output directory for timelapse files (defaults to next to each source)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// List supported container formats
    Formats,

    /// Write the default configuration to a file
    InitConfig {
        /// Destination path
        #[arg(default_value = "timelapse.toml")]
        path: PathBuf,
    },
}

/// Parse a speed such as "10x" or "10".
pub fn parse_speed(value: &str) -> std::result::Result<u32, String> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_suffix('x')
        .or_else(|| trimmed.strip_suffix('X'))
        .unwrap_or(trimmed);

    digits
        .parse::<u32>()
        .map_err(|_| format!("invalid speed '{}': expected a number like 10 or 10x", value))
}

/// Check a parsed speed against the speeds offered to the user.
pub fn validate_speed(speed: u32, allowed: &[u32]) -> Result<SpeedMultiplier> {
    if !allowed.is_empty() && !allowed.contains(&speed) {
        let options = allowed
            .iter()
            .map(|s| format!("{}x", s))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(TimelapseError::Validation(format!(
            "Unsupported speed {}x. Valid speeds: {}",
            speed, options
        )));
    }
    SpeedMultiplier::new(speed)
}
