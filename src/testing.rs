//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::cancel::CancelSignal;
use crate::error::{Result, TimelapseError};
use crate::job::display_name;
use crate::media::{MediaProber, TranscodeEngine, TranscodeRequest, VideoMetadata};

#[derive(Debug, Clone)]
enum ScriptEnd {
    Succeed,
    SucceedWithoutOutput,
    Fail(String),
    FailWithoutOutput(String),
    Hang,
}

/// What the scripted engine does for one input file.
#[derive(Debug, Clone)]
pub struct EngineScript {
    progress: Vec<f64>,
    end: ScriptEnd,
}

impl EngineScript {
    pub fn succeed(progress: Vec<f64>) -> Self {
        Self { progress, end: ScriptEnd::Succeed }
    }

    pub fn succeed_without_output() -> Self {
        Self { progress: vec![0.5], end: ScriptEnd::SucceedWithoutOutput }
    }

    /// Writes a partial output, reports `progress`, then fails.
    pub fn fail_midway(progress: Vec<f64>, reason: &str) -> Self {
        Self { progress, end: ScriptEnd::Fail(reason.to_string()) }
    }

    /// Fails before anything is written, like a binary that cannot start.
    pub fn fail_immediately(reason: &str) -> Self {
        Self { progress: vec![], end: ScriptEnd::FailWithoutOutput(reason.to_string()) }
    }

    /// Writes a partial output, reports `progress`, then waits for cancellation.
    pub fn hang(progress: Vec<f64>) -> Self {
        Self { progress, end: ScriptEnd::Hang }
    }
}

/// Engine that follows a script per input file name instead of running ffmpeg.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    scripts: HashMap<String, EngineScript>,
    calls: Mutex<Vec<TranscodeRequest>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, filename: &str, script: EngineScript) -> Self {
        self.scripts.insert(filename.to_string(), script);
        self
    }

    /// Requests seen so far, in call order.
    pub fn calls(&self) -> Vec<TranscodeRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of transcodes that ran at the same time.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscodeEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn transcode(
        &self,
        request: &TranscodeRequest,
        progress: mpsc::Sender<f64>,
        mut cancel: CancelSignal,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(request.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let script = self
            .scripts
            .get(&display_name(&request.input_path))
            .cloned()
            .unwrap_or_else(|| EngineScript::succeed(vec![0.5]));

        if matches!(script.end, ScriptEnd::Fail(_) | ScriptEnd::Hang) {
            tokio::fs::write(&request.output_path, b"partial").await?;
        }

        for fraction in script.progress {
            let _ = progress.send(fraction).await;
            tokio::task::yield_now().await;
        }

        let result = match script.end {
            ScriptEnd::Succeed => {
                tokio::fs::write(&request.output_path, b"timelapse").await?;
                Ok(())
            }
            ScriptEnd::SucceedWithoutOutput => Ok(()),
            ScriptEnd::Fail(reason) | ScriptEnd::FailWithoutOutput(reason) => {
                Err(TimelapseError::Conversion(reason))
            }
            ScriptEnd::Hang => {
                cancel.cancelled().await;
                Err(TimelapseError::Cancelled)
            }
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn check_availability(&self) -> Result<()> {
        Ok(())
    }

    async fn get_version_info(&self) -> Result<String> {
        Ok("scripted engine".to_string())
    }
}

/// Prober answering from a fixed table; unknown paths are invalid.
#[derive(Debug, Default)]
pub struct TableProber {
    entries: HashMap<PathBuf, VideoMetadata>,
    probes: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl TableProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn video(mut self, path: &Path, duration_secs: f64) -> Self {
        self.entries.insert(
            path.to_path_buf(),
            VideoMetadata::valid(path, duration_secs, 1280, 720, 30.0),
        );
        self
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Highest number of probes that ran at the same time.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaProber for TableProber {
    async fn probe(&self, path: &Path) -> VideoMetadata {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        self.entries
            .get(path)
            .cloned()
            .unwrap_or_else(|| VideoMetadata::invalid(path, "FFprobe failed to analyze video"))
    }
}

/// Create a small placeholder file standing in for a video.
pub fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"video").unwrap();
    path
}
