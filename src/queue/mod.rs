// Job queue
//
// The queue owns every Job record. Interface code and workers only ever see
// clones; all state transitions happen here under one lock and are announced
// on a broadcast channel.

use crate::models::{FolderSelection, Job, JobId, JobLogEntry, JobState};
use crate::services::ResultSet;
use camino::Utf8PathBuf;
use chrono::Local;
use indexmap::IndexMap;
use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::{Notify, broadcast};

const EVENT_BUFFER: usize = 256;

/// Finished jobs kept by [`JobQueue::new`]
pub const DEFAULT_FINISHED_RETENTION: usize = 500;

/// Events emitted on every job state change
///
/// Subscribers that fall behind by more than the channel buffer receive
/// `RecvError::Lagged` and should re-read [`JobQueue::list`].
#[derive(Clone, Debug, PartialEq)]
pub enum QueueEvent {
    /// A job was accepted
    JobQueued { id: JobId, path: Utf8PathBuf },

    /// A worker took the job
    JobStarted { id: JobId, worker: usize },

    /// A line was appended to the job log
    JobLog { id: JobId, entry: JobLogEntry },

    JobSucceeded { id: JobId, result: Utf8PathBuf },

    JobFailed { id: JobId, reason: String },

    JobCancelled { id: JobId },

    /// Nothing is queued and nothing is running
    QueueDrained,

    /// No further jobs are started until resumed
    QueuePaused,

    QueueResumed,
}

/// Errors returned by queue operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("Queue is closed")]
    Closed,

    #[error("Job {0} not found")]
    NotFound(JobId),

    #[error("Job {id} is {state} and can no longer be cancelled")]
    NotCancellable { id: JobId, state: JobState },

    #[error("Job {id} is {state}, not running")]
    NotRunning { id: JobId, state: JobState },

    #[error("{0} is already in the queue")]
    AlreadyQueued(Utf8PathBuf),
}

#[derive(Debug, Default)]
struct QueueInner {
    /// All jobs of this session in submission order
    jobs: IndexMap<JobId, Job>,

    /// Queued job ids, oldest first
    pending: VecDeque<JobId>,

    running: usize,
    closed: bool,
    paused: bool,
}

impl QueueInner {
    fn job_mut(&mut self, id: JobId) -> Result<&mut Job, QueueError> {
        self.jobs.get_mut(&id).ok_or(QueueError::NotFound(id))
    }

    fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.running == 0
    }

    /// Drop the oldest finished jobs until at most `keep` remain.
    fn prune_finished(&mut self, keep: usize) -> usize {
        let finished = self.jobs.values().filter(|job| job.state.is_terminal()).count();
        let mut excess = finished.saturating_sub(keep);
        if excess == 0 {
            return 0;
        }

        let before = self.jobs.len();
        self.jobs.retain(|_, job| {
            if excess > 0 && job.state.is_terminal() {
                excess -= 1;
                false
            } else {
                true
            }
        });
        before - self.jobs.len()
    }
}

/// FIFO queue of folder-processing jobs.
///
/// - [`enqueue()`](Self::enqueue) accepts a validated folder
/// - [`dequeue_next()`](Self::dequeue_next) waits for the oldest Queued job and
///   marks it Running; each job is handed to exactly one caller
/// - [`list()`](Self::list) and [`subscribe()`](Self::subscribe) observe without
///   blocking either side
/// - [`pause()`](Self::pause) holds back Queued jobs; running jobs finish
///
/// Only the newest `retention` finished jobs are kept; older ones are pruned
/// as jobs finish.
///
/// Shared between the orchestrator and workers as `Arc<JobQueue>`.
#[derive(Debug)]
pub struct JobQueue {
    inner: RwLock<QueueInner>,

    /// Wakes idle workers on enqueue, resume and close
    notify: Notify,

    events_tx: broadcast::Sender<QueueEvent>,

    retention: usize,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_FINISHED_RETENTION)
    }

    /// Queue that keeps at most `retention` finished jobs.
    pub fn with_retention(retention: usize) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: RwLock::new(QueueInner::default()),
            notify: Notify::new(),
            events_tx,
            retention,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, QueueInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, QueueInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    /// Subscribe to queue events
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events_tx.subscribe()
    }

    /// Add a job for `folder` to the back of the queue.
    ///
    /// Fails if the queue is closed or the same folder is already Queued or
    /// Running. Folders of finished jobs may be submitted again.
    pub fn enqueue(&self, folder: FolderSelection) -> Result<JobId, QueueError> {
        let mut inner = self.write();

        if inner.closed {
            return Err(QueueError::Closed);
        }

        let duplicate = inner
            .jobs
            .values()
            .any(|job| !job.state.is_terminal() && job.folder.path == folder.path);
        if duplicate {
            return Err(QueueError::AlreadyQueued(folder.path));
        }

        let path = folder.path.clone();
        let mut job = Job::new(folder);
        job.push_log(format!("Queued {}", path));
        let id = job.id;

        inner.jobs.insert(id, job);
        inner.pending.push_back(id);
        tracing::info!(job_id = %id, "Queued {} (position {})", path, inner.pending.len());

        self.emit(QueueEvent::JobQueued { id, path });
        drop(inner);

        self.notify.notify_one();
        Ok(id)
    }

    /// Take the oldest Queued job without waiting. Returns `None` while paused.
    pub fn try_dequeue(&self, worker: usize) -> Option<Job> {
        let mut inner = self.write();

        if inner.paused {
            return None;
        }

        let id = inner.pending.pop_front()?;
        let more_pending = !inner.pending.is_empty();

        let job = inner.jobs.get_mut(&id)?;
        job.state = JobState::Running;
        job.started_at = Some(Local::now());
        job.worker = Some(worker);
        let entry = job.push_log(format!("Started on worker {}", worker)).clone();
        let snapshot = job.clone();
        inner.running += 1;

        tracing::info!(job_id = %id, worker, "Dequeued {}", snapshot.folder.path);
        self.emit(QueueEvent::JobStarted { id, worker });
        self.emit(QueueEvent::JobLog { id, entry });
        drop(inner);

        if more_pending {
            // Pass the wakeup on so another idle worker picks up the rest
            self.notify.notify_one();
        }

        Some(snapshot)
    }

    /// Wait for the oldest Queued job and mark it Running.
    ///
    /// Returns `None` once the queue is closed and nothing is left to run, or
    /// once it is closed while paused; jobs held back by the pause stay Queued.
    pub async fn dequeue_next(&self, worker: usize) -> Option<Job> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent enqueue cannot be missed
            notified.as_mut().enable();

            if let Some(job) = self.try_dequeue(worker) {
                return Some(job);
            }

            if self.read().closed {
                return None;
            }

            notified.await;
        }
    }

    /// Cancel a job that has not started yet.
    pub fn cancel(&self, id: JobId) -> Result<(), QueueError> {
        let mut inner = self.write();

        let job = inner.job_mut(id)?;
        if job.state != JobState::Queued {
            return Err(QueueError::NotCancellable { id, state: job.state });
        }

        job.state = JobState::Cancelled;
        job.finished_at = Some(Local::now());
        let entry = job.push_log("Cancelled").clone();
        inner.pending.retain(|pending| *pending != id);

        tracing::info!(job_id = %id, "Cancelled queued job");
        self.emit(QueueEvent::JobLog { id, entry });
        self.emit(QueueEvent::JobCancelled { id });
        if inner.is_drained() {
            self.emit(QueueEvent::QueueDrained);
        }
        inner.prune_finished(self.retention);

        Ok(())
    }

    /// Cancel every Queued job, returning their ids in queue order.
    pub fn clear_queued(&self) -> Vec<JobId> {
        let mut inner = self.write();
        let ids: Vec<JobId> = inner.pending.drain(..).collect();

        for id in &ids {
            if let Some(job) = inner.jobs.get_mut(id) {
                job.state = JobState::Cancelled;
                job.finished_at = Some(Local::now());
                let entry = job.push_log("Cancelled").clone();
                self.emit(QueueEvent::JobLog { id: *id, entry });
                self.emit(QueueEvent::JobCancelled { id: *id });
            }
        }

        if !ids.is_empty() {
            tracing::info!("Cancelled {} queued job(s)", ids.len());
            if inner.is_drained() {
                self.emit(QueueEvent::QueueDrained);
            }
            inner.prune_finished(self.retention);
        }

        ids
    }

    /// Stop handing out Queued jobs. Running jobs are not affected.
    ///
    /// Returns `false` if the queue was already paused.
    pub fn pause(&self) -> bool {
        let mut inner = self.write();
        if inner.paused {
            return false;
        }
        inner.paused = true;

        tracing::info!("Job queue paused ({} queued)", inner.pending.len());
        self.emit(QueueEvent::QueuePaused);
        true
    }

    /// Hand out Queued jobs again.
    ///
    /// Returns `false` if the queue was not paused.
    pub fn resume(&self) -> bool {
        let mut inner = self.write();
        if !inner.paused {
            return false;
        }
        inner.paused = false;

        tracing::info!("Job queue resumed ({} queued)", inner.pending.len());
        self.emit(QueueEvent::QueueResumed);
        drop(inner);

        self.notify.notify_waiters();
        true
    }

    pub fn is_paused(&self) -> bool {
        self.read().paused
    }

    /// Forget the oldest finished jobs until at most `keep` remain.
    ///
    /// Returns how many were removed. Queued and Running jobs are never pruned.
    pub fn prune_finished(&self, keep: usize) -> usize {
        let removed = self.write().prune_finished(keep);
        if removed > 0 {
            tracing::debug!("Pruned {} finished job(s)", removed);
        }
        removed
    }

    /// Append a timestamped line to a job's log.
    pub fn append_log(&self, id: JobId, message: impl Into<String>) -> Result<(), QueueError> {
        let mut inner = self.write();
        let entry = inner.job_mut(id)?.push_log(message).clone();
        self.emit(QueueEvent::JobLog { id, entry });
        Ok(())
    }

    /// Record how many images the job's folder holds.
    pub fn set_image_count(&self, id: JobId, count: usize) -> Result<(), QueueError> {
        let mut inner = self.write();
        inner.job_mut(id)?.image_count = Some(count);
        Ok(())
    }

    /// Handle that appends to one job's log
    pub fn logger(self: &Arc<Self>, id: JobId) -> JobLogger {
        JobLogger {
            queue: Arc::clone(self),
            id,
        }
    }

    /// Running → Succeeded
    pub fn mark_succeeded(&self, id: JobId, result: &ResultSet) -> Result<(), QueueError> {
        let path = result.path.clone();
        self.finish(id, JobState::Succeeded, |job| {
            job.result = Some(path.clone());
            let entry = job.push_log(format!("Done. Results saved to {}", path)).clone();
            vec![
                QueueEvent::JobLog { id, entry },
                QueueEvent::JobSucceeded { id, result: path },
            ]
        })
    }

    /// Running → Failed
    pub fn mark_failed(&self, id: JobId, reason: impl Into<String>) -> Result<(), QueueError> {
        let reason = reason.into();
        self.finish(id, JobState::Failed, |job| {
            job.failure = Some(reason.clone());
            let entry = job.push_log(format!("Failed: {}", reason)).clone();
            vec![
                QueueEvent::JobLog { id, entry },
                QueueEvent::JobFailed { id, reason },
            ]
        })
    }

    fn finish<F>(&self, id: JobId, state: JobState, update: F) -> Result<(), QueueError>
    where
        F: FnOnce(&mut Job) -> Vec<QueueEvent>,
    {
        let mut inner = self.write();

        let job = inner.job_mut(id)?;
        if job.state != JobState::Running {
            return Err(QueueError::NotRunning { id, state: job.state });
        }

        job.state = state;
        job.finished_at = Some(Local::now());
        let events = update(job);

        inner.running = inner.running.saturating_sub(1);
        for event in events {
            self.emit(event);
        }
        if inner.is_drained() {
            self.emit(QueueEvent::QueueDrained);
        }
        inner.prune_finished(self.retention);

        Ok(())
    }

    /// Snapshot of all jobs in submission order
    pub fn list(&self) -> Vec<Job> {
        self.read().jobs.values().cloned().collect()
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.read().jobs.get(&id).cloned()
    }

    /// Number of Queued jobs
    pub fn pending_len(&self) -> usize {
        self.read().pending.len()
    }

    /// Number of Running jobs
    pub fn running_count(&self) -> usize {
        self.read().running
    }

    /// Reject new jobs and let idle workers exit once the backlog is empty.
    pub fn close(&self) {
        let mut inner = self.write();
        if inner.closed {
            return;
        }
        inner.closed = true;
        drop(inner);

        tracing::debug!("Job queue closed");
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.read().closed
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Appends lines to one job's log.
///
/// Handed to the pipeline so output can be streamed while the job runs.
#[derive(Debug, Clone)]
pub struct JobLogger {
    queue: Arc<JobQueue>,
    id: JobId,
}

impl JobLogger {
    pub fn job_id(&self) -> JobId {
        self.id
    }

    pub fn push(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(job_id = %self.id, "{}", message);
        if let Err(e) = self.queue.append_log(self.id, message) {
            tracing::warn!(job_id = %self.id, "Dropped job log line: {}", e);
        }
    }
}
