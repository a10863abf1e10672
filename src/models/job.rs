use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier of a queued job.
///
/// The string form doubles as the job's temp workspace directory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Where a folder path came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionSource {
    NativeDialog,
    BrowserUpload,
    ManualEntry,
}

impl fmt::Display for SelectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SelectionSource::NativeDialog => "native-dialog",
            SelectionSource::BrowserUpload => "browser-upload",
            SelectionSource::ManualEntry => "manual-entry",
        };
        f.write_str(name)
    }
}

/// A validated, absolute folder path ready to be queued.
///
/// Produced only by [`FolderSelectionService`](crate::services::FolderSelectionService),
/// which guarantees the path existed and was a readable directory at `resolved_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderSelection {
    pub path: Utf8PathBuf,
    pub source: SelectionSource,
    pub resolved_at: DateTime<Local>,
}

impl FolderSelection {
    /// Short name used in log lines (the last path component).
    pub fn display_name(&self) -> &str {
        self.path.file_name().unwrap_or(self.path.as_str())
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    /// Succeeded, Failed and Cancelled are final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// One timestamped line in a job's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobLogEntry {
    pub at: DateTime<Local>,
    pub message: String,
}

impl fmt::Display for JobLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.message)
    }
}

/// A request to run one folder through the face-sorting pipeline.
///
/// Jobs are created and mutated only by [`JobQueue`](crate::queue::JobQueue);
/// callers receive clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub folder: FolderSelection,
    pub submitted_at: DateTime<Local>,
    pub state: JobState,
    pub log: Vec<JobLogEntry>,

    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
    /// Index of the worker that ran the job
    pub worker: Option<usize>,
    pub image_count: Option<usize>,
    /// ResultSet directory, set only on success
    pub result: Option<Utf8PathBuf>,
    pub failure: Option<String>,
}

impl Job {
    pub fn new(folder: FolderSelection) -> Self {
        Self {
            id: JobId::new(),
            folder,
            submitted_at: Local::now(),
            state: JobState::Queued,
            log: Vec::new(),
            started_at: None,
            finished_at: None,
            worker: None,
            image_count: None,
            result: None,
            failure: None,
        }
    }

    /// Append a log line stamped with the current local time.
    pub fn push_log(&mut self, message: impl Into<String>) -> &JobLogEntry {
        self.log.push(JobLogEntry {
            at: Local::now(),
            message: message.into(),
        });
        &self.log[self.log.len() - 1]
    }

    /// Wall-clock time between start and finish, if both happened.
    pub fn run_time(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// The log rendered as `[HH:MM:SS] message` lines.
    pub fn log_lines(&self) -> Vec<String> {
        self.log.iter().map(ToString::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection(path: &str) -> FolderSelection {
        FolderSelection {
            path: Utf8PathBuf::from(path),
            source: SelectionSource::ManualEntry,
            resolved_at: Local::now(),
        }
    }

    #[test]
    fn test_new_job_is_queued() {
        let job = Job::new(selection("/photos/summer"));
        assert_eq!(job.state, JobState::Queued);
        assert!(job.log.is_empty());
        assert!(job.result.is_none());
        assert_eq!(job.folder.display_name(), "summer");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[test]
    fn test_log_line_format() {
        let mut job = Job::new(selection("/photos"));
        job.push_log("Queued photos");

        let line = &job.log_lines()[0];
        assert!(line.starts_with('['));
        assert!(line.ends_with("] Queued photos"));
        // "[HH:MM:SS] " prefix
        assert_eq!(line.find(']'), Some(9));
    }

    #[test]
    fn test_job_id_round_trips_through_string() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_ne!(JobId::new(), id);
    }
}
