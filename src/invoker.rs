//! Runs one conversion and reports it as a progress stream plus an outcome.

use std::ffi::{OsStr, OsString};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::error::{Result, TimelapseError};
use crate::job::JobOutcome;
use crate::media::{TranscodeEngine, TranscodeRequest};

/// Highest fraction reported before the engine has confirmed success.
const MAX_RUNNING_FRACTION: f64 = 0.999;

/// A conversion in flight.
///
/// `progress` yields non-decreasing fractions in [0, 1] and closes before the
/// outcome is ready. On success the last fraction is exactly 1.0.
#[derive(Debug)]
pub struct TranscodeHandle {
    pub progress: mpsc::Receiver<f64>,
    pub outcome: JoinHandle<JobOutcome>,
}

impl TranscodeHandle {
    /// Wait for the outcome, turning a crashed task into a failure.
    pub async fn outcome(self) -> JobOutcome {
        match self.outcome.await {
            Ok(outcome) => outcome,
            Err(e) => JobOutcome::Failed {
                diagnostic: format!("conversion task aborted: {}", e),
            },
        }
    }
}

#[derive(Clone)]
pub struct TranscodeInvoker {
    engine: Arc<dyn TranscodeEngine>,
    buffer: usize,
}

impl TranscodeInvoker {
    pub fn new(engine: Arc<dyn TranscodeEngine>, buffer: usize) -> Self {
        Self {
            engine,
            buffer: buffer.max(1),
        }
    }

    pub fn engine(&self) -> &Arc<dyn TranscodeEngine> {
        &self.engine
    }

    pub fn convert_one(&self, request: TranscodeRequest, cancel: CancelSignal) -> TranscodeHandle {
        let (tx, rx) = mpsc::channel(self.buffer);
        let engine = self.engine.clone();
        let buffer = self.buffer;

        let outcome = tokio::spawn(async move { run(engine, request, tx, cancel, buffer).await });

        TranscodeHandle {
            progress: rx,
            outcome,
        }
    }
}

async fn run(
    engine: Arc<dyn TranscodeEngine>,
    request: TranscodeRequest,
    progress: mpsc::Sender<f64>,
    cancel: CancelSignal,
    buffer: usize,
) -> JobOutcome {
    if let Some(parent) = request.output_path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return JobOutcome::Failed {
                    diagnostic: format!(
                        "Failed to create output directory '{}': {}",
                        parent.display(),
                        e
                    ),
                };
            }
        }
    }

    // The engine writes to a hidden sibling; the real output is only
    // replaced once the conversion is known to be good.
    let staging = staging_path(&request.output_path);
    let engine_request = TranscodeRequest {
        output_path: staging.clone(),
        ..request.clone()
    };

    let (engine_tx, engine_rx) = mpsc::channel(buffer);
    let (result, last) = tokio::join!(
        engine.transcode(&engine_request, engine_tx, cancel),
        forward(engine_rx, &progress)
    );

    let result = match result {
        Ok(()) => publish_output(&staging, &request.output_path).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            if last < 1.0 {
                let _ = progress.send(1.0).await;
            }
            info!("Created {}", request.output_path.display());
            JobOutcome::Completed {
                output_path: request.output_path,
            }
        }
        Err(e) => {
            let diagnostic = match e {
                TimelapseError::Cancelled => "cancelled".to_string(),
                TimelapseError::Conversion(reason) => reason,
                other => other.to_string(),
            };
            warn!("Conversion of {} failed: {}", request.input_path.display(), diagnostic);
            remove_partial_output(&staging).await;
            JobOutcome::Failed { diagnostic }
        }
    }
}

/// `<dir>/.<stem>.part.<ext>`; the extension is kept so ffmpeg still picks
/// the right muxer.
fn staging_path(output: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(output.file_stem().unwrap_or_else(|| OsStr::new("output")));
    name.push(".part");
    if let Some(ext) = output.extension() {
        name.push(".");
        name.push(ext);
    }
    output.with_file_name(name)
}

/// Relay engine progress, keeping it monotonic and below 1.0 until the
/// outcome is known. Returns the last fraction sent.
async fn forward(mut engine_rx: mpsc::Receiver<f64>, progress: &mpsc::Sender<f64>) -> f64 {
    let mut last = 0.0;
    let mut consumer_gone = false;

    while let Some(fraction) = engine_rx.recv().await {
        let fraction = fraction.clamp(0.0, MAX_RUNNING_FRACTION);
        if fraction <= last || consumer_gone {
            continue;
        }
        last = fraction;
        if progress.send(fraction).await.is_err() {
            // Keep draining so the engine never stalls on a full channel.
            consumer_gone = true;
        }
    }

    last
}

/// Check the staged file and move it into place.
async fn publish_output(staging: &Path, output: &Path) -> Result<()> {
    match tokio::fs::metadata(staging).await {
        Ok(meta) if meta.len() > 0 => {}
        Ok(_) => {
            return Err(TimelapseError::Conversion(format!(
                "Output file is empty: {}",
                output.display()
            )));
        }
        Err(_) => {
            return Err(TimelapseError::Conversion(format!(
                "Output file not created: {}",
                output.display()
            )));
        }
    }

    tokio::fs::rename(staging, output).await.map_err(|e| {
        TimelapseError::Conversion(format!(
            "Failed to move output into place at {}: {}",
            output.display(),
            e
        ))
    })
}

/// Delete whatever the engine left behind for a failed job.
async fn remove_partial_output(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial output {}: {}", path.display(), e),
    }
}
