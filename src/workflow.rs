use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cancel::CancelSignal;
use crate::config::{Config, OutputConfig};
use crate::error::{Result, TimelapseError};
use crate::events::{ProgressEvent, ProgressPublisher};
use crate::invoker::TranscodeInvoker;
use crate::job::{BatchResult, BatchRun, ConversionJob, JobOutcome, JobState, SpeedMultiplier};
use crate::media::{MediaFactory, MediaProber, TranscodeEngine, TranscodeRequest, VideoMetadata};
use crate::output::OutputPathResolver;

/// Sequences probing and transcoding over a batch of files.
pub struct BatchOrchestrator {
    config: Config,
    prober: Arc<dyn MediaProber>,
    invoker: TranscodeInvoker,
    resolver: OutputPathResolver,
    probe_cache: Mutex<HashMap<PathBuf, VideoMetadata>>,
}

impl BatchOrchestrator {
    pub fn new(config: Config, prober: Arc<dyn MediaProber>, engine: Arc<dyn TranscodeEngine>) -> Self {
        let invoker = TranscodeInvoker::new(engine, config.conversion.event_buffer);
        let resolver = OutputPathResolver::new(&config.output);

        Self {
            config,
            prober,
            invoker,
            resolver,
            probe_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Orchestrator backed by ffprobe and ffmpeg; fails when ffmpeg cannot be started.
    pub async fn with_ffmpeg(config: Config) -> Result<Self> {
        let prober = MediaFactory::create_prober(&config);
        let engine = MediaFactory::create_engine(&config);

        // Check dependencies
        engine.check_availability().await?;
        info!("Using the {} transcode engine", engine.name());

        Ok(Self::new(config, prober, engine))
    }

    pub fn engine(&self) -> &Arc<dyn TranscodeEngine> {
        self.invoker.engine()
    }

    /// Probe every path, in input order, never short-circuiting on bad files.
    ///
    /// Probes run concurrently up to `probe_concurrency`. Results are kept so
    /// a following conversion does not probe the same files again.
    pub async fn select_and_probe(&self, paths: &[PathBuf]) -> Vec<VideoMetadata> {
        info!("Probing {} file(s)", paths.len());

        let semaphore = Arc::new(Semaphore::new(self.config.conversion.probe_concurrency.max(1)));
        let handles: Vec<_> = paths
            .iter()
            .map(|path| {
                let prober = self.prober.clone();
                let semaphore = semaphore.clone();
                let path = path.clone();
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    prober.probe(&path).await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(paths.len());
        for (path, handle) in paths.iter().zip(handles) {
            let metadata = match handle.await {
                Ok(metadata) => metadata,
                Err(e) => VideoMetadata::invalid(path, format!("Probe task failed: {}", e)),
            };
            results.push(metadata);
        }

        if let Ok(mut cache) = self.probe_cache.lock() {
            for metadata in &results {
                cache.insert(metadata.path.clone(), metadata.clone());
            }
        }

        let valid = results.iter().filter(|m| m.valid).count();
        info!("{} of {} file(s) are valid videos", valid, results.len());
        results
    }

    /// Convert `paths` at `speed`, publishing progress on `events`.
    ///
    /// Only request-level problems are returned as errors; per-file failures
    /// end up in the returned [`BatchResult`].
    pub async fn start_batch_conversion(
        &self,
        paths: &[PathBuf],
        speed: u32,
        events: &ProgressPublisher,
    ) -> Result<BatchResult> {
        self.start_batch_conversion_with_cancel(paths, speed, events, CancelSignal::never())
            .await
    }

    pub async fn start_batch_conversion_with_cancel(
        &self,
        paths: &[PathBuf],
        speed: u32,
        events: &ProgressPublisher,
        cancel: CancelSignal,
    ) -> Result<BatchResult> {
        if paths.is_empty() {
            return Err(TimelapseError::Precondition("No videos selected".to_string()));
        }
        let speed = SpeedMultiplier::new(speed)?;

        let selection = self.metadata_for(paths).await;
        let (valid, invalid): (Vec<_>, Vec<_>) = selection.into_iter().partition(|m| m.valid);

        for metadata in &invalid {
            warn!(
                "Skipping {}: {}",
                metadata.filename,
                metadata.error.as_deref().unwrap_or("invalid video")
            );
        }

        if valid.is_empty() {
            return Err(TimelapseError::Precondition(format!(
                "None of the {} selected file(s) is a valid video",
                paths.len()
            )));
        }

        let mut allocator = self.resolver.allocator(valid.iter().map(|m| m.path.as_path()));
        let jobs = valid
            .iter()
            .map(|m| ConversionJob::new(m.path.clone(), allocator.allocate(&m.path), speed))
            .collect();

        let mut run = BatchRun::new(jobs, invalid.len());
        run.start();
        info!(
            "Batch {} started: {} file(s) at {}, {} skipped",
            run.id,
            run.total_jobs(),
            speed,
            run.skipped_count
        );

        let interval = Duration::from_millis(self.config.conversion.progress_interval_ms);

        for index in 0..run.total_jobs() {
            run.current_index = index;
            let finished = run.finished_jobs();

            if cancel.is_cancelled() {
                run.jobs[index].fail("skipped: batch cancelled")?;
                run.record_progress(finished + 1, 0.0);
                publish(events, progress_event(&run, index, 0.0, None));
                continue;
            }

            // Metadata comes from the selection step; nothing is probed again here.
            run.jobs[index].transition(JobState::Probing)?;
            run.jobs[index].transition(JobState::Queued)?;
            run.record_progress(finished, 0.0);
            publish(events, progress_event(&run, index, 0.0, None));

            run.jobs[index].transition(JobState::Running)?;
            let request = TranscodeRequest::for_job(&run.jobs[index], &valid[index]);
            debug!(
                "Expecting about {:.1}s of output for {}",
                request.expected_output_duration(),
                run.jobs[index].filename()
            );

            let mut handle = self.invoker.convert_one(request, cancel.clone());
            let mut last_emit = Instant::now();
            let mut fraction = 0.0;

            while let Some(update) = handle.progress.recv().await {
                fraction = update;
                run.record_progress(finished, fraction);
                // Full completion is announced by the terminal event.
                if fraction < 1.0 && last_emit.elapsed() >= interval {
                    publish(events, progress_event(&run, index, fraction, None));
                    last_emit = Instant::now();
                }
            }

            match handle.outcome().await {
                JobOutcome::Completed { output_path } => {
                    run.jobs[index].transition(JobState::Completed)?;
                    run.record_progress(finished + 1, 0.0);
                    info!(
                        "[{}/{}] Converted {} -> {}",
                        index + 1,
                        run.total_jobs(),
                        run.jobs[index].filename(),
                        output_path.display()
                    );
                    publish(events, progress_event(&run, index, 1.0, Some(output_path)));
                }
                JobOutcome::Failed { diagnostic } => {
                    warn!(
                        "[{}/{}] Failed to convert {}: {}",
                        index + 1,
                        run.total_jobs(),
                        run.jobs[index].filename(),
                        diagnostic
                    );
                    run.jobs[index].fail(diagnostic)?;
                    run.record_progress(finished + 1, 0.0);
                    publish(events, progress_event(&run, index, fraction, None));
                }
            }
        }

        let result = run.complete();
        info!(
            "Batch {} finished in {:.1}s: {}",
            run.id, result.elapsed_secs, result.message
        );
        Ok(result)
    }

    /// Cached metadata for known paths, probing only the rest.
    async fn metadata_for(&self, paths: &[PathBuf]) -> Vec<VideoMetadata> {
        let known: HashMap<PathBuf, VideoMetadata> = match self.probe_cache.lock() {
            Ok(cache) => paths
                .iter()
                .filter_map(|p| cache.get(p).map(|m| (p.clone(), m.clone())))
                .collect(),
            Err(_) => HashMap::new(),
        };

        let mut missing: Vec<PathBuf> = paths.iter().filter(|p| !known.contains_key(*p)).cloned().collect();
        missing.dedup();
        let probed: HashMap<PathBuf, VideoMetadata> = if missing.is_empty() {
            HashMap::new()
        } else {
            self.select_and_probe(&missing)
                .await
                .into_iter()
                .map(|m| (m.path.clone(), m))
                .collect()
        };

        paths
            .iter()
            .map(|p| {
                known
                    .get(p)
                    .or_else(|| probed.get(p))
                    .cloned()
                    .unwrap_or_else(|| VideoMetadata::invalid(p, "Failed to probe video"))
            })
            .collect()
    }
}

/// Expand directories into the supported video files they contain.
///
/// Plain files are kept as given so the prober can report why they are
/// rejected. Files that look like our own outputs (`<prefix>*.<extension>`)
/// or staged partial outputs are left out while walking.
pub fn collect_inputs(inputs: &[PathBuf], config: &Config) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for input in inputs {
        if !input.is_dir() {
            files.push(input.clone());
            continue;
        }

        let mut found = Vec::new();
        for entry in WalkDir::new(input).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() || !config.is_supported_format(entry.path()) {
                continue;
            }
            if is_generated_output(entry.path(), &config.output) {
                info!("Skipping {}: looks like a timelapse output", entry.path().display());
                continue;
            }
            found.push(entry.into_path());
        }
        found.sort();

        info!("Found {} video file(s) in {}", found.len(), input.display());
        files.extend(found);
    }

    files
}

fn is_generated_output(path: &Path, output: &OutputConfig) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    if name.starts_with('.') && name.contains(".part.") {
        return true;
    }

    let extension = output.extension.trim_start_matches('.');
    let same_extension = path
        .extension()
        .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(extension));
    !output.prefix.is_empty() && name.starts_with(&output.prefix) && same_extension
}

fn progress_event(
    run: &BatchRun,
    index: usize,
    file_fraction: f64,
    output_path: Option<PathBuf>,
) -> ProgressEvent {
    let job = &run.jobs[index];
    let status = job.state();
    let status_label = match (status, job.diagnostic()) {
        (JobState::Failed, Some(diagnostic)) => format!("Failed: {}", diagnostic),
        (state, _) => state.label().to_string(),
    };

    ProgressEvent {
        current_file_index: index + 1,
        total_files: run.total_jobs(),
        filename: job.filename(),
        file_percent: (file_fraction * 100.0).clamp(0.0, 100.0),
        aggregate_percent: run.aggregate_progress(),
        status,
        status_label,
        output_path,
    }
}

fn publish(events: &ProgressPublisher, event: ProgressEvent) {
    if !events.publish(event) {
        debug!("No progress subscriber, event dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::cancel_pair;
    use crate::events::progress_channel;
    use crate::media::MockMediaProber;
    use crate::testing::{touch, EngineScript, ScriptedEngine, TableProber};
    use std::path::Path;
    use tokio_test::{assert_err, assert_ok};

    fn test_config() -> Config {
        let mut config = Config::default();
        config.conversion.progress_interval_ms = 0;
        config.conversion.event_buffer = 256;
        config
    }

    fn orchestrator(prober: TableProber, engine: Arc<ScriptedEngine>) -> BatchOrchestrator {
        BatchOrchestrator::new(test_config(), Arc::new(prober), engine)
    }

    async fn collect(mut subscriber: crate::events::ProgressSubscriber) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = subscriber.recv().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_collect_inputs_walks_directories() {
        let dir = assert_fs::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("day2")).unwrap();
        let b = touch(&dir.path().join("day2"), "b.MOV");
        let a = touch(dir.path(), "a.mp4");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "timelapse-a.mp4");
        touch(dir.path(), ".timelapse-b.part.mp4");
        let own = touch(dir.path(), "timelapse-holiday.mov");
        let loose = PathBuf::from("/elsewhere/clip.txt");

        let files = collect_inputs(&[dir.path().to_path_buf(), loose.clone()], &Config::default());
        assert_eq!(files, vec![a, b, own, loose]);
    }

    #[tokio::test]
    async fn test_probe_mixed_paths_keeps_order() {
        let dir = assert_fs::TempDir::new().unwrap();
        let a = touch(dir.path(), "A.mp4");
        let b = dir.path().join("B.mp4");
        let c = touch(dir.path(), "C.mov");
        let prober = TableProber::new().video(&a, 120.0).video(&c, 30.0);
        let orch = orchestrator(prober, Arc::new(ScriptedEngine::new()));

        let results = orch.select_and_probe(&[a.clone(), b.clone(), c.clone()]).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().map(|m| m.path.clone()).collect::<Vec<_>>(), vec![a, b, c]);
        assert_eq!(results.iter().filter(|m| m.valid).count(), 2);
        let invalid: Vec<_> = results.iter().filter(|m| !m.valid).collect();
        assert_eq!(invalid.len(), 1);
        assert!(!invalid[0].error.as_deref().unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_empty_selection() {
        let orch = orchestrator(TableProber::new(), Arc::new(ScriptedEngine::new()));
        let (publisher, _subscriber) = progress_channel(8);

        let err = assert_err!(orch.start_batch_conversion(&[], 10, &publisher).await);
        assert!(err.is_precondition());
    }

    #[tokio::test]
    async fn test_rejects_invalid_speed_before_any_work() {
        let dir = assert_fs::TempDir::new().unwrap();
        let a = touch(dir.path(), "A.mp4");
        let engine = Arc::new(ScriptedEngine::new());
        let prober = TableProber::new().video(&a, 120.0);
        let orch = orchestrator(prober, engine.clone());
        let (publisher, _subscriber) = progress_channel(8);

        for speed in [0, 1] {
            let err = assert_err!(orch.start_batch_conversion(&[a.clone()], speed, &publisher).await);
            assert!(matches!(err, TimelapseError::Precondition(_)));
        }
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_batch_without_valid_files() {
        let dir = assert_fs::TempDir::new().unwrap();
        let bad = touch(dir.path(), "bad.mp4");
        let engine = Arc::new(ScriptedEngine::new());
        let orch = orchestrator(TableProber::new(), engine.clone());
        let (publisher, _subscriber) = progress_channel(8);

        let err = assert_err!(orch.start_batch_conversion(&[bad], 5, &publisher).await);
        assert!(err.is_precondition());
        assert!(engine.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_file_is_excluded_from_batch() {
        let dir = assert_fs::TempDir::new().unwrap();
        let a = touch(dir.path(), "A.mp4");
        let b = touch(dir.path(), "B.mp4");
        let engine = Arc::new(ScriptedEngine::new());
        let orch = orchestrator(TableProber::new().video(&a, 120.0), engine.clone());
        let (publisher, subscriber) = progress_channel(256);

        let selection = orch.select_and_probe(&[a.clone(), b.clone()]).await;
        let convertible: Vec<PathBuf> =
            selection.iter().filter(|m| m.valid).map(|m| m.path.clone()).collect();
        assert_eq!(convertible, vec![a.clone()]);

        let result = assert_ok!(orch.start_batch_conversion(&[a.clone(), b], 5, &publisher).await);
        drop(publisher);

        assert!(result.success);
        assert_eq!(result.converted_count, 1);
        assert_eq!(result.failed_count, 0);
        assert_eq!(result.skipped_count, 1);
        assert_eq!(result.output_paths, vec![dir.path().join("timelapse-A.mp4")]);
        assert_eq!(engine.calls().len(), 1);
        assert_eq!(engine.calls()[0].speed.get(), 5);

        let events = collect(subscriber).await;
        assert!(events.iter().all(|e| e.filename == "A.mp4" && e.total_files == 1));
        let last = events.last().unwrap();
        assert_eq!(last.status, JobState::Completed);
        assert_eq!(last.output_path, Some(dir.path().join("timelapse-A.mp4")));
    }

    #[tokio::test]
    async fn test_aggregate_progress_is_monotonic_and_hits_100_once() {
        let dir = assert_fs::TempDir::new().unwrap();
        let a = touch(dir.path(), "a.mp4");
        let b = touch(dir.path(), "b.mp4");
        let c = touch(dir.path(), "c.mp4");
        let engine = Arc::new(
            ScriptedEngine::new()
                .script("a.mp4", EngineScript::succeed(vec![0.1, 0.5, 0.9]))
                .script("b.mp4", EngineScript::fail_midway(vec![0.3], "FFmpeg exited with exit status: 1"))
                .script("c.mp4", EngineScript::succeed(vec![0.25, 0.75])),
        );
        let prober = TableProber::new().video(&a, 60.0).video(&b, 90.0).video(&c, 120.0);
        let orch = orchestrator(prober, engine);
        let (publisher, subscriber) = progress_channel(256);

        let result = assert_ok!(orch.start_batch_conversion(&[a, b, c], 10, &publisher).await);
        drop(publisher);
        let events = collect(subscriber).await;

        assert_eq!(result.converted_count + result.failed_count, 3);
        let aggregates: Vec<f64> = events.iter().map(|e| e.aggregate_percent).collect();
        assert!(aggregates.windows(2).all(|w| w[0] <= w[1]), "{:?}", aggregates);
        assert_eq!(aggregates.iter().filter(|p| **p >= 100.0).count(), 1);
        assert_eq!(*aggregates.last().unwrap(), 100.0);
        assert!(events.last().unwrap().status.is_terminal());
    }

    #[tokio::test]
    async fn test_each_file_weighs_the_same() {
        let dir = assert_fs::TempDir::new().unwrap();
        let short = touch(dir.path(), "short.mp4");
        let long = touch(dir.path(), "long.mp4");
        let engine = Arc::new(
            ScriptedEngine::new()
                .script("short.mp4", EngineScript::succeed(vec![0.25, 0.5, 0.75]))
                .script("long.mp4", EngineScript::succeed(vec![0.1, 0.4, 0.8])),
        );
        let prober = TableProber::new().video(&short, 60.0).video(&long, 120.0);
        let orch = orchestrator(prober, engine);
        let (publisher, subscriber) = progress_channel(256);

        assert_ok!(orch.start_batch_conversion(&[short, long], 2, &publisher).await);
        drop(publisher);
        let events = collect(subscriber).await;

        for event in &events {
            if event.aggregate_percent > 50.0 {
                assert_eq!(event.current_file_index, 2, "{:?}", event);
            }
        }
        let first_done = events
            .iter()
            .find(|e| e.current_file_index == 1 && e.status == JobState::Completed)
            .unwrap();
        assert_eq!(first_done.aggregate_percent, 50.0);
        assert!(events.iter().any(|e| e.current_file_index == 2 && e.aggregate_percent == 70.0));
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_partial_output_removed() {
        let dir = assert_fs::TempDir::new().unwrap();
        let a = touch(dir.path(), "a.mp4");
        let b = touch(dir.path(), "b.mp4");
        let engine = Arc::new(
            ScriptedEngine::new()
                .script("a.mp4", EngineScript::fail_midway(vec![0.4], "Conversion failed: disk full"))
                .script("b.mp4", EngineScript::succeed(vec![0.5])),
        );
        let prober = TableProber::new().video(&a, 60.0).video(&b, 60.0);
        let orch = orchestrator(prober, engine.clone());
        let (publisher, subscriber) = progress_channel(256);

        let result = assert_ok!(orch.start_batch_conversion(&[a, b], 10, &publisher).await);
        drop(publisher);

        assert_eq!(result.failed_count, 1);
        assert_eq!(result.converted_count, 1);
        assert!(result.success);
        assert_eq!(result.message, "Converted 1 video, 1 failed: a.mp4");
        assert_eq!(result.failures[0].diagnostic, "Conversion failed: disk full");
        assert!(!dir.path().join("timelapse-a.mp4").exists());
        assert!(dir.path().join("timelapse-b.mp4").exists());
        assert_eq!(engine.calls().len(), 2);

        let events = collect(subscriber).await;
        let failed = events.iter().find(|e| e.status == JobState::Failed).unwrap();
        assert_eq!(failed.filename, "a.mp4");
        assert_eq!(failed.status_label, "Failed: Conversion failed: disk full");
    }

    #[tokio::test]
    async fn test_all_failed_batch_is_not_a_success() {
        let dir = assert_fs::TempDir::new().unwrap();
        let a = touch(dir.path(), "a.mp4");
        let engine = Arc::new(
            ScriptedEngine::new().script("a.mp4", EngineScript::fail_midway(vec![], "missing codec")),
        );
        let orch = orchestrator(TableProber::new().video(&a, 60.0), engine);
        let (publisher, _subscriber) = progress_channel(256);

        let result = assert_ok!(orch.start_batch_conversion(&[a], 10, &publisher).await);
        assert!(!result.success);
        assert_eq!(result.converted_count, 0);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.message, "All conversions failed: a.mp4");
    }

    #[tokio::test]
    async fn test_jobs_run_sequentially_in_input_order() {
        let dir = assert_fs::TempDir::new().unwrap();
        let names = ["c.mp4", "a.mp4", "b.mp4"];
        let paths: Vec<PathBuf> = names.iter().map(|n| touch(dir.path(), n)).collect();
        let mut prober = TableProber::new();
        for p in &paths {
            prober = prober.video(p, 10.0);
        }
        let engine = Arc::new(ScriptedEngine::new());
        let orch = orchestrator(prober, engine.clone());
        let (publisher, subscriber) = progress_channel(256);

        assert_ok!(orch.start_batch_conversion(&paths, 5, &publisher).await);
        drop(publisher);

        let called: Vec<PathBuf> = engine.calls().into_iter().map(|r| r.input_path).collect();
        assert_eq!(called, paths);
        assert_eq!(engine.max_active(), 1);

        // Events of one file never follow events of the next one.
        let indices: Vec<usize> = collect(subscriber).await.iter().map(|e| e.current_file_index).collect();
        assert!(indices.windows(2).all(|w| w[0] <= w[1]), "{:?}", indices);
    }

    #[tokio::test]
    async fn test_running_events_are_throttled() {
        let dir = assert_fs::TempDir::new().unwrap();
        let a = touch(dir.path(), "a.mp4");
        let b = touch(dir.path(), "b.mp4");
        let engine = Arc::new(
            ScriptedEngine::new()
                .script("a.mp4", EngineScript::succeed(vec![0.1, 0.3, 0.5, 0.7, 0.9]))
                .script("b.mp4", EngineScript::fail_midway(vec![0.2, 0.4, 0.6], "exit status: 1")),
        );
        let mut config = test_config();
        config.conversion.progress_interval_ms = 60_000;
        let prober = TableProber::new().video(&a, 60.0).video(&b, 60.0);
        let orch = BatchOrchestrator::new(config, Arc::new(prober), engine);
        let (publisher, subscriber) = progress_channel(256);

        assert_ok!(orch.start_batch_conversion(&[a, b], 10, &publisher).await);
        drop(publisher);

        let seen: Vec<(usize, JobState)> = collect(subscriber)
            .await
            .iter()
            .map(|e| (e.current_file_index, e.status))
            .collect();
        assert_eq!(
            seen,
            vec![
                (1, JobState::Queued),
                (1, JobState::Completed),
                (2, JobState::Queued),
                (2, JobState::Failed),
            ]
        );
    }

    #[tokio::test]
    async fn test_probing_respects_concurrency_limit() {
        let dir = assert_fs::TempDir::new().unwrap();
        let paths: Vec<PathBuf> = (0..8).map(|i| touch(dir.path(), &format!("clip{}.mp4", i))).collect();
        let mut prober = TableProber::new();
        for p in &paths {
            prober = prober.video(p, 30.0);
        }
        let prober = Arc::new(prober);
        let mut config = test_config();
        config.conversion.probe_concurrency = 2;
        let orch = BatchOrchestrator::new(config, prober.clone(), Arc::new(ScriptedEngine::new()));

        let results = orch.select_and_probe(&paths).await;

        assert!(prober.max_active() <= 2, "peak {}", prober.max_active());
        assert!(prober.max_active() >= 1);
        assert_eq!(prober.probes(), 8);
        assert_eq!(results.iter().map(|m| m.path.clone()).collect::<Vec<_>>(), paths);
    }

    #[tokio::test]
    async fn test_colliding_outputs_are_disambiguated() {
        let dir = assert_fs::TempDir::new().unwrap();
        let mp4 = touch(dir.path(), "clip.mp4");
        let mov = touch(dir.path(), "clip.mov");
        let prober = TableProber::new().video(&mp4, 10.0).video(&mov, 10.0);
        let orch = orchestrator(prober, Arc::new(ScriptedEngine::new()));
        let (publisher, _subscriber) = progress_channel(256);

        let result = assert_ok!(orch.start_batch_conversion(&[mp4, mov], 10, &publisher).await);
        assert_eq!(
            result.output_paths,
            vec![dir.path().join("timelapse-clip.mp4"), dir.path().join("timelapse-clip-2.mp4")]
        );
    }

    #[tokio::test]
    async fn test_selected_metadata_is_not_probed_again() {
        let a = PathBuf::from("/videos/A.mp4");
        let b = PathBuf::from("/videos/B.mp4");

        let mut prober = MockMediaProber::new();
        prober
            .expect_probe()
            .times(2)
            .returning(|path: &Path| VideoMetadata::valid(path, 60.0, 640, 480, 25.0));

        let dir = assert_fs::TempDir::new().unwrap();
        let mut config = test_config();
        config.output.directory = Some(dir.path().to_path_buf());
        let orch = BatchOrchestrator::new(config, Arc::new(prober), Arc::new(ScriptedEngine::new()));
        let (publisher, _subscriber) = progress_channel(256);

        orch.select_and_probe(&[a.clone(), b.clone()]).await;
        let result = assert_ok!(orch.start_batch_conversion(&[a, b], 10, &publisher).await);
        assert_eq!(result.converted_count, 2);
    }

    #[tokio::test]
    async fn test_unknown_paths_are_probed_at_conversion_time() {
        let dir = assert_fs::TempDir::new().unwrap();
        let a = touch(dir.path(), "a.mp4");
        let prober = Arc::new(TableProber::new().video(&a, 60.0));
        let orch = BatchOrchestrator::new(test_config(), prober.clone(), Arc::new(ScriptedEngine::new()));
        let (publisher, _subscriber) = progress_channel(256);

        let result = assert_ok!(orch.start_batch_conversion(&[a], 10, &publisher).await);
        assert_eq!(result.converted_count, 1);
        assert_eq!(prober.probes(), 1);
    }

    #[tokio::test]
    async fn test_cancel_fails_current_and_skips_remaining() {
        let dir = assert_fs::TempDir::new().unwrap();
        let a = touch(dir.path(), "a.mp4");
        let b = touch(dir.path(), "b.mp4");
        let c = touch(dir.path(), "c.mp4");
        let engine = Arc::new(
            ScriptedEngine::new()
                .script("a.mp4", EngineScript::succeed(vec![0.5]))
                .script("b.mp4", EngineScript::hang(vec![0.2])),
        );
        let prober = TableProber::new().video(&a, 10.0).video(&b, 10.0).video(&c, 10.0);
        let orch = orchestrator(prober, engine.clone());
        let (publisher, mut subscriber) = progress_channel(256);
        let (handle, signal) = cancel_pair();

        let watcher = tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(event) = subscriber.recv().await {
                if event.current_file_index == 2 && event.status == JobState::Running {
                    handle.cancel();
                }
                events.push(event);
            }
            events
        });

        let result = assert_ok!(
            orch.start_batch_conversion_with_cancel(&[a, b, c], 10, &publisher, signal).await
        );
        drop(publisher);
        let events = watcher.await.unwrap();

        assert_eq!(result.converted_count, 1);
        assert_eq!(result.failed_count, 2);
        assert_eq!(result.failures[0].diagnostic, "cancelled");
        assert_eq!(result.failures[1].diagnostic, "skipped: batch cancelled");
        assert_eq!(engine.calls().len(), 2);
        assert!(!dir.path().join("timelapse-b.mp4").exists());
        assert_eq!(events.last().unwrap().aggregate_percent, 100.0);
    }
}
