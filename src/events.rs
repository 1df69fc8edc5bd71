//! Progress event bus between the orchestrator and the presentation layer.
//!
//! One publisher, one subscriber, bounded buffering. When the subscriber
//! falls behind, intermediate events are coalesced: the newest undelivered
//! event replaces the one parked before it, so the subscriber always ends up
//! seeing the freshest state in emission order.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::debug;

use crate::job::JobState;

/// Name of the progress channel as seen by a frontend.
pub const CONVERSION_PROGRESS: &str = "conversion-progress";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// 1-based position of the file in the batch
    pub current_file_index: usize,
    pub total_files: usize,
    pub filename: String,
    /// Progress of the current file, 0-100
    pub file_percent: f64,
    /// Progress of the whole batch, 0-100
    pub aggregate_percent: f64,
    pub status: JobState,
    pub status_label: String,
    pub output_path: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct Shared {
    parked: Option<ProgressEvent>,
    coalesced: u64,
}

/// Write side, owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct ProgressPublisher {
    tx: mpsc::Sender<ProgressEvent>,
    shared: Arc<Mutex<Shared>>,
}

/// Read side, owned by the presentation layer.
#[derive(Debug)]
pub struct ProgressSubscriber {
    rx: mpsc::Receiver<ProgressEvent>,
    shared: Arc<Mutex<Shared>>,
}

pub fn progress_channel(capacity: usize) -> (ProgressPublisher, ProgressSubscriber) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Mutex::new(Shared::default()));
    (
        ProgressPublisher {
            tx,
            shared: shared.clone(),
        },
        ProgressSubscriber { rx, shared },
    )
}

impl ProgressPublisher {
    /// Publish without waiting. Never blocks the orchestrator.
    ///
    /// Returns false once the subscriber is gone.
    pub fn publish(&self, event: ProgressEvent) -> bool {
        let Ok(mut shared) = self.shared.lock() else {
            return false;
        };

        // A parked event is older than `event`; it has to go first.
        if let Some(parked) = shared.parked.take() {
            match self.tx.try_send(parked) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    shared.parked = Some(event);
                    shared.coalesced += 1;
                    return true;
                }
                Err(TrySendError::Closed(_)) => return false,
            }
        }

        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                debug!("Progress subscriber is behind, parking latest event");
                shared.parked = Some(event);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl ProgressSubscriber {
    /// Next event in emission order; `None` once the publisher is dropped
    /// and everything has been delivered.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        loop {
            {
                let Ok(mut shared) = self.shared.lock() else {
                    return None;
                };
                match self.rx.try_recv() {
                    Ok(event) => return Some(event),
                    Err(TryRecvError::Empty) => {
                        if let Some(event) = shared.parked.take() {
                            return Some(event);
                        }
                    }
                    Err(TryRecvError::Disconnected) => return shared.parked.take(),
                }
            }

            match self.rx.recv().await {
                Some(event) => return Some(event),
                None => {
                    // Publisher gone; a parked event may still be waiting.
                    continue;
                }
            }
        }
    }

    /// Number of events dropped in favour of a newer one.
    pub fn coalesced(&self) -> u64 {
        self.shared.lock().map(|s| s.coalesced).unwrap_or(0)
    }
}
