//! FaceSort - sort a folder of photos into one directory per person.
//!
//! Command-line entry point. It initializes:
//! - Configuration loading ([`ConfigManager`]) from `FaceSort Data/`
//! - Logging infrastructure (file rotation + console output)
//! - Tokio runtime (4 threads for workers and pipeline subprocesses)
//! - The [`Orchestrator`] with its job queue and workers
//!
//! # Execution Flow
//!
//! 1. Load `FaceSort Config.yaml` (plus `FACESORT_*` overrides)
//! 2. Initialize logging → `<log_dir>/facesort.<date>`
//! 3. Sweep stale temp workspaces and start workers
//! 4. Submit every folder argument, and one picked folder with `--pick`
//! 5. Wait until the queue drains (Ctrl-C cancels queued jobs and interrupts
//!    the running ones)
//! 6. Print each job's outcome and the session metrics

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Parser;
use facesort::models::JobState;
use facesort::services::{CommandPipeline, DialogError, SelectionError};
use facesort::{APP_NAME, ConfigManager, Orchestrator, QueueEvent, SelectionSource, SubmitError, UserConfig, VERSION};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};

#[derive(Parser, Debug)]
#[command(name = "facesort", version, about = "Sort photo folders into one directory per person")]
struct Cli {
    /// Folders with photos to process, in order
    folders: Vec<String>,

    /// Also pick a folder with the native folder dialog
    #[arg(long)]
    pick: bool,

    /// Number of concurrent workers (overrides the config file)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Directory holding `FaceSort Config.yaml`
    #[arg(long, default_value = "FaceSort Data")]
    config_dir: Utf8PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Log to file only
    #[arg(short, long)]
    quiet: bool,

    /// Print the available native folder dialogs and exit
    #[arg(long)]
    list_dialogs: bool,

    /// Print existing result directories, newest first, and exit
    #[arg(long)]
    list_results: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::new(&cli.config_dir)?;
    let mut user_config = config_manager.load_user_config()?;
    if let Some(workers) = cli.workers {
        user_config.workers = workers;
    }

    let debug = cli.debug || user_config.debug_mode;
    let log_dir = config_manager.resolve(&user_config.log_dir)?;
    let _guard = facesort::logging::setup_logging_with_console(&log_dir, "facesort", debug, !cli.quiet)?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(4)
        .thread_name("facesort-worker")
        .build()?;

    let result = runtime.block_on(run(cli, user_config));

    runtime.shutdown_timeout(Duration::from_secs(5));
    tracing::info!("Application shutdown complete");

    result
}

async fn run(cli: Cli, config: UserConfig) -> Result<()> {
    let pipeline = Arc::new(CommandPipeline::from_config(&config));
    let orchestrator = Arc::new(Orchestrator::new(config, &cli.config_dir, pipeline)?);

    if cli.list_dialogs {
        let capabilities = orchestrator.capabilities();
        if capabilities.is_empty() {
            println!("No native folder dialog available; pass folders as arguments");
        }
        for capability in capabilities {
            println!("{}", capability);
        }
        return Ok(());
    }

    if cli.list_results {
        for path in orchestrator.list_results()? {
            println!("{}", path);
        }
        return Ok(());
    }

    let sweep = orchestrator.start()?;
    if !sweep.removed.is_empty() {
        println!("Removed {} stale temp workspace(s)", sweep.removed.len());
    }

    let signal_target = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, stopping...");
            signal_target.shutdown();
        }
    });

    let (printer_stop, printer_stop_rx) = watch::channel(false);
    let printer = tokio::spawn(print_job_logs(orchestrator.subscribe(), printer_stop_rx));

    let mut submitted = 0;
    for folder in &cli.folders {
        match orchestrator.submit(SelectionSource::ManualEntry, folder) {
            Ok(_) => submitted += 1,
            Err(e) => eprintln!("Skipping {}: {}", folder, e),
        }
    }

    if cli.pick {
        match orchestrator.preferred_capability() {
            Some(capability) => {
                let picker = orchestrator.clone();
                match tokio::task::spawn_blocking(move || picker.submit_from_dialog(capability)).await? {
                    Ok(_) => submitted += 1,
                    Err(SubmitError::Selection(SelectionError::Dialog(DialogError::Cancelled))) => {
                        println!("No folder selected");
                    }
                    Err(e) => eprintln!("Folder selection failed: {}", e),
                }
            }
            None => eprintln!("No native folder dialog available; pass folders as arguments"),
        }
    }

    if submitted == 0 {
        tracing::warn!("No jobs submitted");
    }

    orchestrator.finish().await;
    printer_stop.send_replace(true);
    if let Err(e) = printer.await {
        tracing::warn!("Log printer task failed: {}", e);
    }

    for job in orchestrator.jobs() {
        match job.state {
            JobState::Succeeded => println!(
                "OK      {} -> {}",
                job.folder.path,
                job.result.map(|p| p.to_string()).unwrap_or_default()
            ),
            JobState::Failed => println!(
                "FAILED  {}: {}",
                job.folder.path,
                job.failure.unwrap_or_default()
            ),
            state => println!("{:<7} {}", state.to_string().to_uppercase(), job.folder.path),
        }
    }

    orchestrator.metrics().log_summary();
    Ok(())
}

/// Echo per-job log lines to stdout while jobs run.
async fn print_job_logs(events: broadcast::Receiver<QueueEvent>, stop: watch::Receiver<bool>) {
    forward_events(events, stop, print_event).await;
}

/// Hand every event to `sink` until `stop` flips, then flush what is still
/// buffered and return.
async fn forward_events<F>(mut events: broadcast::Receiver<QueueEvent>, mut stop: watch::Receiver<bool>, mut sink: F)
where
    F: FnMut(QueueEvent),
{
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => sink(event),
                Err(RecvError::Lagged(missed)) => tracing::debug!("Skipped {} log events", missed),
                Err(RecvError::Closed) => return,
            },
            _ = stop.wait_for(|stop| *stop) => break,
        }
    }

    loop {
        match events.try_recv() {
            Ok(event) => sink(event),
            Err(TryRecvError::Lagged(missed)) => tracing::debug!("Skipped {} log events", missed),
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
}

fn print_event(event: QueueEvent) {
    match event {
        QueueEvent::JobLog { entry, .. } => println!("{}", entry),
        QueueEvent::QueuePaused => println!("Queue paused"),
        QueueEvent::QueueResumed => println!("Queue resumed"),
        _ => {}
    }
}
