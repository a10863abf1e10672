// Job metrics
//
// Lock-free counters for the lifetime of one orchestrator

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Session metrics
///
/// Updated by the orchestrator and workers, logged on shutdown.
#[derive(Debug)]
pub struct Metrics {
    /// Jobs accepted into the queue
    pub jobs_submitted: AtomicUsize,

    /// Submissions rejected before a job was created
    pub submissions_rejected: AtomicUsize,

    pub jobs_succeeded: AtomicUsize,

    pub jobs_failed: AtomicUsize,

    pub jobs_cancelled: AtomicUsize,

    /// Wall-clock time spent in Running, in milliseconds
    pub total_processing_time_ms: AtomicU64,

    /// Images found in the folders of started jobs
    pub images_seen: AtomicU64,

    /// Stale temp workspaces removed by the startup sweep
    pub temp_swept: AtomicUsize,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            jobs_submitted: AtomicUsize::new(0),
            submissions_rejected: AtomicUsize::new(0),
            jobs_succeeded: AtomicUsize::new(0),
            jobs_failed: AtomicUsize::new(0),
            jobs_cancelled: AtomicUsize::new(0),
            total_processing_time_ms: AtomicU64::new(0),
            images_seen: AtomicU64::new(0),
            temp_swept: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.submissions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self, count: usize) {
        self.jobs_cancelled.fetch_add(count, Ordering::Relaxed);
    }

    /// Record how long one job was Running
    pub fn record_processing_time(&self, duration: Duration) {
        self.total_processing_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_images(&self, count: usize) {
        self.images_seen.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_swept(&self, count: usize) {
        self.temp_swept.fetch_add(count, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Jobs that reached Succeeded or Failed
    pub fn jobs_finished(&self) -> usize {
        self.jobs_succeeded.load(Ordering::Relaxed) + self.jobs_failed.load(Ordering::Relaxed)
    }

    /// Average Running time per finished job in milliseconds
    pub fn avg_processing_time_ms(&self) -> f64 {
        let total = self.total_processing_time_ms.load(Ordering::Relaxed);
        let count = self.jobs_finished();
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("=== FaceSort Session Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Jobs: {} submitted, {} succeeded, {} failed, {} cancelled ({} rejected submissions)",
            self.jobs_submitted.load(Ordering::Relaxed),
            self.jobs_succeeded.load(Ordering::Relaxed),
            self.jobs_failed.load(Ordering::Relaxed),
            self.jobs_cancelled.load(Ordering::Relaxed),
            self.submissions_rejected.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Processing time: {:.2}s (avg: {:.2}ms per job), {} images",
            self.total_processing_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            self.avg_processing_time_ms(),
            self.images_seen.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Stale temp workspaces removed: {}",
            self.temp_swept.load(Ordering::Relaxed)
        );
    }

    /// One-line progress report for long batches
    pub fn log_periodic(&self) {
        tracing::info!(
            "Metrics: {} of {} jobs finished, uptime {:.0}s",
            self.jobs_finished(),
            self.jobs_submitted.load(Ordering::Relaxed),
            self.uptime().as_secs_f64()
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
