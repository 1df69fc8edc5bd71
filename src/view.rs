//! Presentation state for a frontend.
//!
//! `ViewState` never drives the conversion. It is fed the probe results, the
//! progress events and the final result, and renders from those alone.

use std::path::PathBuf;

use crate::events::ProgressEvent;
use crate::job::{BatchResult, JobState};
use crate::media::VideoMetadata;

#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub files: Vec<VideoMetadata>,
    pub converting: bool,
    pub current_index: usize,
    pub total_files: usize,
    pub current_file: Option<String>,
    pub file_percent: f64,
    pub aggregate_percent: f64,
    pub status_label: String,
    pub outputs: Vec<PathBuf>,
    pub failed_files: Vec<String>,
    pub result: Option<BatchResult>,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the selection with freshly probed files.
    pub fn select(&mut self, files: Vec<VideoMetadata>) {
        self.files = files;
        self.result = None;
    }

    pub fn valid_count(&self) -> usize {
        self.files.iter().filter(|f| f.valid).count()
    }

    /// Paths the user can convert; invalid files stay listed but excluded.
    pub fn convertible_paths(&self) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|f| f.valid)
            .map(|f| f.path.clone())
            .collect()
    }

    pub fn begin(&mut self) {
        self.converting = true;
        self.current_index = 0;
        self.total_files = self.valid_count();
        self.current_file = None;
        self.file_percent = 0.0;
        self.aggregate_percent = 0.0;
        self.status_label = "Starting...".to_string();
        self.outputs.clear();
        self.failed_files.clear();
        self.result = None;
    }

    pub fn observe(&mut self, event: &ProgressEvent) {
        if !self.converting {
            return;
        }

        self.current_index = event.current_file_index;
        self.total_files = event.total_files;
        self.current_file = Some(event.filename.clone());
        self.file_percent = event.file_percent;
        self.aggregate_percent = self.aggregate_percent.max(event.aggregate_percent);
        self.status_label = event.status_label.clone();

        match event.status {
            JobState::Completed => {
                if let Some(path) = &event.output_path {
                    self.outputs.push(path.clone());
                }
            }
            JobState::Failed => self.failed_files.push(event.filename.clone()),
            _ => {}
        }
    }

    pub fn finish(&mut self, result: BatchResult) {
        self.converting = false;
        self.status_label = result.message.clone();
        if result.success {
            self.aggregate_percent = 100.0;
        }
        self.result = Some(result);
    }

    /// One line describing what is happening right now.
    pub fn status_line(&self) -> String {
        if self.converting {
            match &self.current_file {
                Some(file) => format!(
                    "[{}/{}] {} - {} ({:.0}%)",
                    self.current_index, self.total_files, file, self.status_label, self.file_percent
                ),
                None => self.status_label.clone(),
            }
        } else if let Some(result) = &self.result {
            result.message.clone()
        } else {
            let invalid = self.files.len() - self.valid_count();
            if invalid > 0 {
                format!(
                    "{} video(s) ready to convert, {} invalid",
                    self.valid_count(),
                    invalid
                )
            } else {
                format!("{} video(s) ready to convert", self.valid_count())
            }
        }
    }
}
