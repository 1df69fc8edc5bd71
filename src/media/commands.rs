use std::ffi::{OsStr, OsString};
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::process::{Child, Command};
use tracing::debug;

use crate::config::MediaConfig;
use crate::error::{Result, TimelapseError};
use super::TranscodeRequest;

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    /// Kept as OS strings so non UTF-8 file names reach the tools unchanged
    pub args: Vec<OsString>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args.extend(args.into_iter().map(|s| s.as_ref().to_os_string()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Never read from stdin
    pub fn no_stdin(self) -> Self {
        self.arg("-nostdin")
    }

    /// Set log verbosity
    pub fn log_level<S: AsRef<OsStr>>(self, level: S) -> Self {
        self.arg("-loglevel").arg(level)
    }

    /// Write machine readable `key=value` progress to stdout
    pub fn progress_to_stdout(self) -> Self {
        self.arg("-progress").arg("pipe:1").arg("-nostats")
    }

    /// Set video codec
    pub fn video_codec<S: AsRef<OsStr>>(self, codec: S) -> Self {
        self.arg("-c:v").arg(codec)
    }

    /// Set encoder preset
    pub fn preset<S: AsRef<OsStr>>(self, preset: S) -> Self {
        self.arg("-preset").arg(preset)
    }

    /// Set constant rate factor
    pub fn crf(self, crf: u8) -> Self {
        self.arg("-crf").arg(crf.to_string())
    }

    /// Set output frame rate
    pub fn frame_rate(self, fps: f64) -> Self {
        self.arg("-r").arg(format!("{}", fps))
    }

    /// Disable audio
    pub fn no_audio(self) -> Self {
        self.arg("-an")
    }

    /// Add video filter
    pub fn video_filter<S: AsRef<OsStr>>(self, filter: S) -> Self {
        self.arg("-filter:v").arg(filter)
    }

    /// Run to completion and return captured output
    pub async fn execute(&self) -> Result<Output> {
        debug!("Executing media processing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .stdin(Stdio::null())
            .output()
            .await?;

        Ok(output)
    }

    /// Start the command with stdout and stderr piped for streaming
    pub fn spawn(&self) -> Result<Child> {
        debug!("Spawning media processing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        Command::new(&self.binary_path)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TimelapseError::Conversion(format!(
                    "Failed to start {}: {}. Please ensure FFmpeg is installed.",
                    self.binary_path, e
                ))
            })
    }
}

/// Builder for the commands the converter needs
#[derive(Debug, Clone)]
pub struct MediaCommandBuilder {
    binary_path: String,
}

impl MediaCommandBuilder {
    /// Create a new command builder
    pub fn new<S: Into<String>>(binary_path: S) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }

    /// Build the time-remapping transcode: output PTS = input PTS / speed.
    ///
    /// The frame rate of the source is kept so the encoder drops frames
    /// instead of producing a high frame rate file.
    pub fn timelapse(&self, request: &TranscodeRequest, encoding: &MediaConfig) -> MediaCommand {
        let mut cmd = MediaCommand::new(&self.binary_path, "Timelapse conversion")
            .overwrite()
            .no_stdin()
            .input(&request.input_path)
            .progress_to_stdout()
            .log_level(encoding.log_level.clone())
            .video_filter(format!("setpts=PTS/{}", request.speed.get()));

        if request.frame_rate > 0.0 {
            cmd = cmd.frame_rate(request.frame_rate);
        }

        cmd.no_audio()
            .video_codec(encoding.video_codec.clone())
            .preset(encoding.preset.clone())
            .crf(encoding.crf)
            .args(encoding.extra_options.iter().cloned())
            .output(&request.output_path)
    }

    /// Build the ffprobe metadata query
    pub fn probe<P: AsRef<Path>>(&self, path: P) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Media probe")
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .output(path)
    }

    /// Build version check command
    pub fn version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Version check").arg("-version")
    }
}
