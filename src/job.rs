//! Conversion jobs, batch runs and their results.
//!
//! A [`ConversionJob`] only moves forward through its states and ends in
//! exactly one of [`JobState::Completed`] or [`JobState::Failed`]. A
//! [`BatchRun`] owns its jobs for the lifetime of one conversion request and
//! folds their outcomes into a [`BatchResult`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{Result, TimelapseError};

/// Factor by which output playback time is compressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpeedMultiplier(u32);

impl SpeedMultiplier {
    pub fn new(value: u32) -> Result<Self> {
        if value <= 1 {
            return Err(TimelapseError::Precondition(format!(
                "speed multiplier must be an integer greater than 1, got {}",
                value
            )));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Output duration of a clip of `duration_secs` after the time remap.
    pub fn remapped_duration(self, duration_secs: f64) -> f64 {
        duration_secs / self.0 as f64
    }
}

impl TryFrom<u32> for SpeedMultiplier {
    type Error = TimelapseError;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}

impl fmt::Display for SpeedMultiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Probing,
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Probing => 1,
            Self::Queued => 2,
            Self::Running => 3,
            Self::Completed | Self::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Any non-terminal state may fail; everything else only moves forward
    /// and `Completed` is only reachable from `Running`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed => true,
            Self::Completed => self == Self::Running,
            _ => next.rank() > self.rank(),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Probing => "Probing...",
            Self::Queued => "Starting...",
            Self::Running => "Converting...",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }
}

/// Terminal outcome of one transcode.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { output_path: PathBuf },
    Failed { diagnostic: String },
}

#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    pub speed: SpeedMultiplier,
    state: JobState,
    diagnostic: Option<String>,
}

impl ConversionJob {
    pub fn new(source_path: PathBuf, output_path: PathBuf, speed: SpeedMultiplier) -> Self {
        Self {
            source_path,
            output_path,
            speed,
            state: JobState::Pending,
            diagnostic: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    pub fn filename(&self) -> String {
        display_name(&self.source_path)
    }

    pub fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(TimelapseError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    pub fn fail(&mut self, diagnostic: impl Into<String>) -> Result<()> {
        self.transition(JobState::Failed)?;
        self.diagnostic = Some(diagnostic.into());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Idle,
    Running,
    Completed,
}

/// State of one conversion request.
#[derive(Debug)]
pub struct BatchRun {
    pub id: Uuid,
    pub jobs: Vec<ConversionJob>,
    pub current_index: usize,
    pub skipped_count: usize,
    phase: BatchPhase,
    aggregate_progress: f64,
    started_at: Option<DateTime<Utc>>,
}

impl BatchRun {
    pub fn new(jobs: Vec<ConversionJob>, skipped_count: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            jobs,
            current_index: 0,
            skipped_count,
            phase: BatchPhase::Idle,
            aggregate_progress: 0.0,
            started_at: None,
        }
    }

    pub fn phase(&self) -> BatchPhase {
        self.phase
    }

    pub fn total_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub fn aggregate_progress(&self) -> f64 {
        self.aggregate_progress
    }

    pub fn start(&mut self) {
        self.phase = BatchPhase::Running;
        self.started_at = Some(Utc::now());
    }

    /// Fold the current job's fraction into the batch aggregate.
    ///
    /// Every finished job weighs the same regardless of its duration, and the
    /// aggregate never moves backwards.
    pub fn record_progress(&mut self, finished_jobs: usize, current_fraction: f64) -> f64 {
        let total = self.jobs.len().max(1) as f64;
        let fraction = current_fraction.clamp(0.0, 1.0);
        let value = ((100.0 * finished_jobs as f64 + 100.0 * fraction) / total).min(100.0);
        if value > self.aggregate_progress {
            self.aggregate_progress = value;
        }
        self.aggregate_progress
    }

    pub fn finished_jobs(&self) -> usize {
        self.jobs.iter().filter(|j| j.state().is_terminal()).count()
    }

    /// Close the run and compute its result.
    pub fn complete(&mut self) -> BatchResult {
        self.phase = BatchPhase::Completed;
        let finished_at = Utc::now();
        let elapsed_secs = self
            .started_at
            .map(|s| (finished_at - s).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        let mut output_paths = Vec::new();
        let mut failures = Vec::new();
        for job in &self.jobs {
            match job.state() {
                JobState::Completed => output_paths.push(job.output_path.clone()),
                _ => failures.push(FailedFile {
                    filename: job.filename(),
                    diagnostic: job
                        .diagnostic()
                        .unwrap_or("conversion did not finish")
                        .to_string(),
                }),
            }
        }

        BatchResult::new(output_paths, failures, self.skipped_count, elapsed_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedFile {
    pub filename: String,
    pub diagnostic: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub success: bool,
    pub message: String,
    pub converted_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub output_paths: Vec<PathBuf>,
    pub failures: Vec<FailedFile>,
    pub elapsed_secs: f64,
}

impl BatchResult {
    /// A batch with at least one converted file counts as a success; failed
    /// files are listed in the message instead.
    pub fn new(
        output_paths: Vec<PathBuf>,
        failures: Vec<FailedFile>,
        skipped_count: usize,
        elapsed_secs: f64,
    ) -> Self {
        let converted_count = output_paths.len();
        let failed_count = failures.len();

        let mut message = if failed_count == 0 {
            format!(
                "Successfully converted {} video{}!",
                converted_count,
                plural(converted_count)
            )
        } else {
            let names = failures
                .iter()
                .map(|f| f.filename.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            if converted_count > 0 {
                format!(
                    "Converted {} video{}, {} failed: {}",
                    converted_count,
                    plural(converted_count),
                    failed_count,
                    names
                )
            } else {
                format!("All conversions failed: {}", names)
            }
        };

        if skipped_count > 0 {
            message.push_str(&format!(
                " ({} invalid file{} skipped)",
                skipped_count,
                plural(skipped_count)
            ));
        }

        Self {
            success: converted_count > 0,
            message,
            converted_count,
            failed_count,
            skipped_count,
            output_paths,
            failures,
            elapsed_secs,
        }
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

/// File name for display, "Unknown" when the path has none.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}
