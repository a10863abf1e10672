//! Process-wide owner of the queue, services and workers.
//!
//! The interface layer (CLI today) talks only to [`Orchestrator`]: it submits
//! folders, observes jobs through snapshots or [`QueueEvent`]s, and controls the
//! worker lifecycle with [`start`](Orchestrator::start),
//! [`finish`](Orchestrator::finish) and [`shutdown`](Orchestrator::shutdown).

use crate::metrics::Metrics;
use crate::models::{FolderSelection, Job, JobId, SelectionSource, UserConfig};
use crate::queue::{JobQueue, QueueError, QueueEvent};
use crate::services::{
    DialogCapability, FacePipeline, FolderSelectionService, NativeDialogAdapter, ResultLifecycleManager,
    SelectionError, SweepReport,
};
use crate::worker::ProcessingWorker;
use anyhow::{Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::BTreeSet;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Why a submission did not produce a job
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub struct Orchestrator {
    config: UserConfig,
    queue: Arc<JobQueue>,
    selection: FolderSelectionService,
    dialogs: NativeDialogAdapter,
    lifecycle: Arc<ResultLifecycleManager>,
    pipeline: Arc<dyn FacePipeline>,
    metrics: Arc<Metrics>,

    /// Send `true` to stop workers and interrupt running pipelines
    shutdown_tx: watch::Sender<bool>,

    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Orchestrator {
    /// Wire up an orchestrator from user settings.
    ///
    /// Relative roots are resolved against `config_dir`. Probes nothing yet;
    /// dialog capabilities are detected on first use.
    pub fn new(config: UserConfig, config_dir: &Utf8Path, pipeline: Arc<dyn FacePipeline>) -> Result<Self> {
        let lifecycle = ResultLifecycleManager::new(
            config.temp_root_path(config_dir)?,
            config.results_root_path(config_dir)?,
        );
        lifecycle.check_roots()?;
        let dialogs = NativeDialogAdapter::with_platform_defaults(config.dialog_title.clone());
        Ok(Self::with_components(config, pipeline, lifecycle, dialogs))
    }

    /// Build from explicit parts, e.g. with custom roots or dialog backends.
    pub fn with_components(
        config: UserConfig,
        pipeline: Arc<dyn FacePipeline>,
        lifecycle: ResultLifecycleManager,
        dialogs: NativeDialogAdapter,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let retention = config.finished_job_retention;

        Self {
            config,
            queue: Arc::new(JobQueue::with_retention(retention)),
            selection: FolderSelectionService::new(),
            dialogs,
            lifecycle: Arc::new(lifecycle),
            pipeline,
            metrics: Arc::new(Metrics::new()),
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Sweep stale temp workspaces, then spawn the workers.
    ///
    /// Must be called from within a tokio runtime, once.
    pub fn start(&self) -> Result<SweepReport> {
        if self.started.swap(true, Ordering::SeqCst) {
            bail!("Orchestrator already started");
        }
        self.lifecycle.check_roots()?;

        let report = self.lifecycle.sweep_stale_temp();
        self.metrics.record_swept(report.removed.len());
        if !report.failed.is_empty() {
            tracing::warn!("{} stale temp workspace(s) could not be removed", report.failed.len());
        }

        let count = self.config.worker_count();
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        for index in 0..count {
            let worker = ProcessingWorker::new(
                index,
                self.queue.clone(),
                self.lifecycle.clone(),
                self.pipeline.clone(),
                self.metrics.clone(),
                self.shutdown_tx.subscribe(),
            );
            workers.push(worker.spawn());
        }

        tracing::info!(
            "Started {} worker(s); temp root {}, results root {}",
            count,
            self.lifecycle.temp_root(),
            self.lifecycle.results_root()
        );

        Ok(report)
    }

    /// Validate `raw` and queue it.
    pub fn submit(&self, source: SelectionSource, raw: &str) -> Result<JobId, SubmitError> {
        let selection = self.selection.select(source, raw).inspect_err(|e| {
            tracing::warn!("Rejected folder {:?}: {}", raw, e);
            self.metrics.record_rejected();
        })?;

        Ok(self.submit_selection(selection)?)
    }

    /// Queue an already validated folder.
    pub fn submit_selection(&self, selection: FolderSelection) -> Result<JobId, QueueError> {
        match self.queue.enqueue(selection) {
            Ok(id) => {
                self.metrics.record_submitted();
                Ok(id)
            }
            Err(e) => {
                tracing::warn!("Rejected submission: {}", e);
                self.metrics.record_rejected();
                Err(e)
            }
        }
    }

    /// Ask the native picker for a folder and queue it.
    ///
    /// Blocks until the picker closes; call from a blocking context.
    pub fn submit_from_dialog(&self, capability: DialogCapability) -> Result<JobId, SubmitError> {
        let selection = self.selection.select_from_dialog(&self.dialogs, capability)?;
        Ok(self.submit_selection(selection)?)
    }

    /// Cancel a job that has not started yet.
    pub fn cancel(&self, id: JobId) -> Result<(), QueueError> {
        self.queue.cancel(id)?;
        self.metrics.record_cancelled(1);
        Ok(())
    }

    /// Let running jobs finish but start no new ones.
    pub fn pause(&self) -> bool {
        self.queue.pause()
    }

    pub fn resume(&self) -> bool {
        self.queue.resume()
    }

    pub fn is_paused(&self) -> bool {
        self.queue.is_paused()
    }

    /// Snapshot of all jobs in submission order
    pub fn jobs(&self) -> Vec<Job> {
        self.queue.list()
    }

    pub fn job(&self, id: JobId) -> Option<Job> {
        self.queue.get(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.queue.subscribe()
    }

    /// Native dialogs usable on this machine (detected once)
    pub fn capabilities(&self) -> BTreeSet<DialogCapability> {
        self.dialogs.detect_capabilities()
    }

    pub fn preferred_capability(&self) -> Option<DialogCapability> {
        self.dialogs.preferred_capability()
    }

    /// Existing result directories, newest first
    pub fn list_results(&self) -> io::Result<Vec<Utf8PathBuf>> {
        self.lifecycle.list_results()
    }

    /// Stop accepting jobs, let workers drain the queue and wait for them.
    ///
    /// On a paused queue only running jobs are waited for; queued ones stay
    /// Queued.
    pub async fn finish(&self) {
        self.queue.close();
        self.join_workers().await;
    }

    /// Stop now: cancel queued jobs and interrupt running ones.
    ///
    /// Returns the ids of the cancelled jobs. Workers exit on their own; await
    /// [`finish`](Self::finish) to wait for them.
    pub fn shutdown(&self) -> Vec<JobId> {
        tracing::info!("Shutdown requested");
        self.shutdown_tx.send_replace(true);
        self.queue.close();

        let cancelled = self.queue.clear_queued();
        self.metrics.record_cancelled(cancelled.len());
        cancelled
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    async fn join_workers(&self) {
        let handles = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Worker task join error: {}", e);
            }
        }
    }

    pub fn config(&self) -> &UserConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn lifecycle(&self) -> &ResultLifecycleManager {
        &self.lifecycle
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}
