//! Timelapse - batch video to timelapse converter
//!
//! Entry point of the command line frontend. It probes the selected videos,
//! runs the batch through the orchestrator and renders progress events.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use timelapse::cancel::cancel_pair;
use timelapse::cli::{validate_speed, Args, Commands};
use timelapse::config::Config;
use timelapse::events::{progress_channel, ProgressSubscriber};
use timelapse::job::display_name;
use timelapse::media::{MediaFactory, VideoMetadata};
use timelapse::view::ViewState;
use timelapse::workflow::{collect_inputs, BatchOrchestrator};

const DEFAULT_CONFIG_FILE: &str = "timelapse.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Setup logging to both console and file
    setup_logging(args.verbose)?;

    // Load configuration
    let mut config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new(DEFAULT_CONFIG_FILE).exists() {
                info!("Found {} in current directory, loading...", DEFAULT_CONFIG_FILE);
                Config::from_file(DEFAULT_CONFIG_FILE)?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Formats => {
            println!("Supported formats:");
            for format in &config.conversion.supported_formats {
                println!("  .{}", format);
            }
            let speeds = config
                .conversion
                .allowed_speeds
                .iter()
                .map(|s| format!("{}x", s))
                .collect::<Vec<_>>()
                .join(", ");
            println!("Speeds: {}", speeds);
        }
        Commands::InitConfig { path } => {
            if path.exists() {
                anyhow::bail!("{} already exists", path.display());
            }
            Config::default().save_to_file(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
        Commands::Probe { inputs } => {
            let files = collect_inputs(&inputs, &config);
            let orchestrator = BatchOrchestrator::new(
                config.clone(),
                MediaFactory::create_prober(&config),
                MediaFactory::create_engine(&config),
            );

            let mut view = ViewState::new();
            view.select(orchestrator.select_and_probe(&files).await);
            print_selection(&view.files);
            println!("\n{}", view.status_line());
        }
        Commands::Convert { inputs, speed, output_dir } => {
            let speed = validate_speed(speed, &config.conversion.allowed_speeds)?;
            if output_dir.is_some() {
                config.output.directory = output_dir;
            }

            let files = collect_inputs(&inputs, &config);
            let buffer = config.conversion.event_buffer;
            let orchestrator = BatchOrchestrator::with_ffmpeg(config).await?;
            info!(
                "Using {}",
                orchestrator
                    .engine()
                    .get_version_info()
                    .await
                    .unwrap_or_else(|_| "unknown ffmpeg version".to_string())
            );

            let mut view = ViewState::new();
            view.select(orchestrator.select_and_probe(&files).await);
            print_selection(&view.files);

            let convertible = view.convertible_paths();
            if convertible.is_empty() {
                anyhow::bail!("No valid videos to convert");
            }

            let (cancel_handle, cancel_signal) = cancel_pair();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling the batch...");
                    cancel_handle.cancel();
                }
            });

            let (publisher, subscriber) = progress_channel(buffer);
            view.begin();
            let renderer = tokio::spawn(render_progress(subscriber, view));

            let result = orchestrator
                .start_batch_conversion_with_cancel(&convertible, speed.get(), &publisher, cancel_signal)
                .await;
            // Closing the channel ends the renderer
            drop(publisher);
            let mut view = renderer.await?;
            let result = result?;

            println!("\n{:<40} {:<10} {}", "File", "Status", "Output / Reason");
            println!("{}", "-".repeat(90));
            for path in &result.output_paths {
                println!("{:<40} {:<10} {}", display_name(path), "Done", path.display());
            }
            for failure in &result.failures {
                println!("{:<40} {:<10} {}", failure.filename, "Failed", failure.diagnostic);
            }

            let success = result.success;
            info!("Finished in {:.1}s", result.elapsed_secs);
            view.finish(result);
            println!("\n{}", view.status_line());

            if !success {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Drive a progress bar from the event stream until the batch ends.
async fn render_progress(mut subscriber: ProgressSubscriber, mut view: ViewState) -> ViewState {
    let bar = ProgressBar::new(100);
    match ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
    {
        Ok(style) => bar.set_style(style.progress_chars("#>-")),
        Err(e) => warn!("Falling back to the default progress style: {}", e),
    }

    while let Some(event) = subscriber.recv().await {
        view.observe(&event);
        bar.set_position(view.aggregate_percent.round() as u64);
        bar.set_message(view.status_line());
    }

    if subscriber.coalesced() > 0 {
        info!("{} progress update(s) were coalesced", subscriber.coalesced());
    }
    bar.finish_and_clear();
    view
}

fn print_selection(files: &[VideoMetadata]) {
    println!("{:<40} {:<12} {:<10} {:<8} {}", "File", "Resolution", "Duration", "FPS", "Status");
    println!("{}", "-".repeat(90));
    for file in files {
        if file.valid {
            println!(
                "{:<40} {:<12} {:<10} {:<8.2} {}",
                file.filename,
                file.resolution(),
                format_duration(file.duration_secs),
                file.frame_rate,
                "OK"
            );
        } else {
            println!(
                "{:<40} {:<12} {:<10} {:<8} {}",
                file.filename,
                "-",
                "-",
                "-",
                file.error.as_deref().unwrap_or("Invalid video")
            );
        }
    }
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir: PathBuf = std::env::current_dir()?.join(".timelapse").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Set up file appender with daily rotation
    let file_appender = rolling::daily(&log_dir, "timelapse.log");
    let (non_blocking_file, _guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(_guard);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("timelapse.log").display()
    );

    Ok(())
}

/// Format a duration in seconds as m:ss or h:mm:ss
fn format_duration(seconds: f64) -> String {
    let total = seconds.round() as u64;
    if total < 3600 {
        format!("{}:{:02}", total / 60, total % 60)
    } else {
        format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
    }
}
