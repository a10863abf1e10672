// Processing worker
//
// Each worker takes one job at a time from the queue and drives it through
// revalidation, temp workspace allocation, the pipeline and result
// materialization. No per-job error ever leaves `process`; a panicking job
// runs on its own task and is recorded as Failed.

use crate::metrics::Metrics;
use crate::models::Job;
use crate::queue::{JobLogger, JobQueue};
use crate::services::{
    FacePipeline, FolderSelectionService, PipelineError, PipelineRequest, ResultLifecycleManager, ResultSet,
    SelectionError, TempWorkspace, WorkspaceError, count_images,
};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Why a job ended up Failed
#[derive(Error, Debug)]
pub enum JobFailure {
    #[error(transparent)]
    InvalidFolder(#[from] SelectionError),

    #[error("Could not read folder: {0}")]
    Unreadable(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("Could not create a temp workspace: {0}")]
    WorkspaceAllocation(#[source] WorkspaceError),

    #[error("Could not save results: {0}")]
    Materialize(#[source] WorkspaceError),

    #[error("interrupted by shutdown")]
    Interrupted,

    #[error("pipeline panicked: {0}")]
    Panicked(String),
}

/// One consumer of the [`JobQueue`].
///
/// Blocks on the queue while idle and on the pipeline while busy. Stops when
/// the queue is closed and empty, or when shutdown is signalled.
#[derive(Clone)]
pub struct ProcessingWorker {
    index: usize,
    queue: Arc<JobQueue>,
    lifecycle: Arc<ResultLifecycleManager>,
    pipeline: Arc<dyn FacePipeline>,
    selection: FolderSelectionService,
    metrics: Arc<Metrics>,

    /// Becomes `true` when the orchestrator shuts down
    shutdown_rx: watch::Receiver<bool>,
}

impl ProcessingWorker {
    pub fn new(
        index: usize,
        queue: Arc<JobQueue>,
        lifecycle: Arc<ResultLifecycleManager>,
        pipeline: Arc<dyn FacePipeline>,
        metrics: Arc<Metrics>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            index,
            queue,
            lifecycle,
            pipeline,
            selection: FolderSelectionService::new(),
            metrics,
            shutdown_rx,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Run the worker loop on the current tokio runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        tracing::info!(worker = self.index, "Worker started");

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            let mut shutdown = self.shutdown_rx.clone();
            let job = tokio::select! {
                job = self.queue.dequeue_next(self.index) => job,
                _ = wait_for_shutdown(&mut shutdown) => None,
            };

            let Some(job) = job else {
                break;
            };

            self.process(job).await;
        }

        tracing::info!(worker = self.index, "Worker stopped");
    }

    /// Drive one Running job to Succeeded or Failed.
    async fn process(&self, job: Job) {
        let id = job.id;
        let started = Instant::now();
        tracing::info!(job_id = %id, worker = self.index, "Processing {}", job.folder.path);

        let runner = self.clone();
        let outcome = match tokio::spawn(async move { runner.execute(&job).await }).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => Err(JobFailure::Panicked(panic_message(e.into_panic()))),
            Err(e) => Err(JobFailure::Panicked(e.to_string())),
        };
        let elapsed = started.elapsed();
        self.metrics.record_processing_time(elapsed);

        match outcome {
            Ok(result) => {
                tracing::info!(
                    job_id = %id,
                    worker = self.index,
                    "Job succeeded in {:.2}s: {}",
                    elapsed.as_secs_f32(),
                    result.path
                );
                self.metrics.record_succeeded();
                if let Err(e) = self.queue.mark_succeeded(id, &result) {
                    tracing::error!(job_id = %id, "Failed to record success: {}", e);
                }
            }
            Err(failure) => {
                tracing::warn!(job_id = %id, worker = self.index, "Job failed: {}", failure);
                self.metrics.record_failed();
                if let Err(e) = self.queue.mark_failed(id, failure.to_string()) {
                    tracing::error!(job_id = %id, "Failed to record failure: {}", e);
                }
            }
        }

        self.metrics.log_periodic();
    }

    async fn execute(&self, job: &Job) -> Result<ResultSet, JobFailure> {
        let log = self.queue.logger(job.id);

        self.selection.revalidate(&job.folder)?;

        let folder = job.folder.path.clone();
        let images = tokio::task::spawn_blocking(move || count_images(&folder))
            .await
            .map_err(|e| JobFailure::Unreadable(e.to_string()))?
            .map_err(|e| JobFailure::Unreadable(e.to_string()))?;

        log.push(format!("Found {} images in {}", images, job.folder.display_name()));
        if let Err(e) = self.queue.set_image_count(job.id, images) {
            tracing::warn!(job_id = %job.id, "Failed to record image count: {}", e);
        }
        self.metrics.record_images(images);

        if images == 0 {
            return Err(PipelineError::NoImages(job.folder.path.clone()).into());
        }

        let mut workspace = self
            .lifecycle
            .allocate_temp(job.id)
            .map_err(JobFailure::WorkspaceAllocation)?;

        let outcome = self.run_in_workspace(job, &workspace, &log).await;

        if let Err(e) = self.lifecycle.release_temp(&mut workspace) {
            tracing::warn!(job_id = %job.id, "{}", e);
        }

        outcome
    }

    async fn run_in_workspace(
        &self,
        job: &Job,
        workspace: &TempWorkspace,
        log: &JobLogger,
    ) -> Result<ResultSet, JobFailure> {
        let request = PipelineRequest {
            job_id: job.id,
            input: job.folder.path.clone(),
            workspace: workspace.path().to_path_buf(),
            output: workspace.output_dir(),
        };

        log.push("Sorting faces...");

        let mut shutdown = self.shutdown_rx.clone();
        let report = tokio::select! {
            report = self.pipeline.run(&request, log) => report?,
            _ = wait_for_shutdown(&mut shutdown) => return Err(JobFailure::Interrupted),
        };

        log.push(format!("Sorting finished: {}", report.summary()));
        if let Some(path) = &report.report_path {
            log.push(format!("Report: {}", path));
        }

        self.lifecycle
            .materialize_result(job.id, workspace)
            .map_err(JobFailure::Materialize)
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Resolves once shutdown is requested; never resolves if the sender is gone.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
