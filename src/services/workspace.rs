//! Temporary workspaces and permanent result directories.
//!
//! Layout (both roots configurable):
//!
//! ```text
//! ~/FaceSort_Temp/<job-id>/output/      scratch, exists only while the job runs
//! ~/FaceSort_Results/facesort_<YYYYMMDD_HHMMSS>[_<n>]/   permanent, never overwritten
//! ```
//!
//! A [`TempWorkspace`] releases itself on drop if nobody released it explicitly,
//! and [`ResultLifecycleManager::sweep_stale_temp`] removes workspaces a crashed
//! process left behind.

use crate::models::JobId;
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;
use walkdir::WalkDir;

/// Subdirectory of a workspace the pipeline writes its sorted output into
pub const OUTPUT_DIR: &str = "output";

/// Prefix of every result directory name
pub const RESULT_PREFIX: &str = "facesort_";

const RESULT_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const MAX_NAME_ATTEMPTS: usize = 10_000;

/// Errors that can occur while managing workspaces and results
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Failed to allocate temp workspace {path}: {source}")]
    Allocation {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to release temp workspace {path}: {source}")]
    Release {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to save results to {path}: {source}")]
    Materialize {
        path: Utf8PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No free result directory name for {0}")]
    NamesExhausted(String),

    #[error("Results root {results_root} must not be inside temp root {temp_root}")]
    OverlappingRoots {
        temp_root: Utf8PathBuf,
        results_root: Utf8PathBuf,
    },
}

/// Scratch directory owned by one running job.
///
/// Released exactly once: either through
/// [`ResultLifecycleManager::release_temp`] or, failing that, on drop.
#[derive(Debug)]
pub struct TempWorkspace {
    job_id: JobId,
    path: Utf8PathBuf,
    created_at: DateTime<Local>,
    released: bool,
}

impl TempWorkspace {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Where the pipeline should write sorted output
    pub fn output_dir(&self) -> Utf8PathBuf {
        self.path.join(OUTPUT_DIR)
    }

    pub fn created_at(&self) -> DateTime<Local> {
        self.created_at
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        match remove_dir_if_exists(self.path.as_std_path()) {
            Ok(()) => tracing::warn!(
                job_id = %self.job_id,
                "Temp workspace {} released on drop",
                self.path
            ),
            Err(e) => tracing::error!(
                job_id = %self.job_id,
                "Failed to release temp workspace {} on drop: {}",
                self.path,
                e
            ),
        }
    }
}

/// Permanent output of a succeeded job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub job_id: JobId,
    pub path: Utf8PathBuf,
    pub completed_at: DateTime<Local>,
}

/// Outcome of the startup sweep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepReport {
    pub removed: Vec<Utf8PathBuf>,
    pub failed: Vec<(Utf8PathBuf, String)>,
}

/// Allocates, releases and promotes per-job directories.
///
/// Every job gets its own directory under each root, so no locking is needed
/// across jobs; result names are claimed with `create_dir`, which fails instead
/// of overwriting.
#[derive(Debug, Clone)]
pub struct ResultLifecycleManager {
    temp_root: Utf8PathBuf,
    results_root: Utf8PathBuf,
}

impl ResultLifecycleManager {
    pub fn new(temp_root: impl Into<Utf8PathBuf>, results_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
            results_root: results_root.into(),
        }
    }

    pub fn temp_root(&self) -> &Utf8Path {
        &self.temp_root
    }

    pub fn results_root(&self) -> &Utf8Path {
        &self.results_root
    }

    /// Refuse a temp root that is, or contains, the results root.
    ///
    /// The sweep deletes workspaces under the temp root, so results must live
    /// outside it.
    pub fn check_roots(&self) -> Result<(), WorkspaceError> {
        if self.results_root.starts_with(&self.temp_root) {
            return Err(WorkspaceError::OverlappingRoots {
                temp_root: self.temp_root.clone(),
                results_root: self.results_root.clone(),
            });
        }
        Ok(())
    }

    /// Delete leftover workspaces under the temp root.
    ///
    /// Run before any worker starts; no in-memory job survives a restart, so
    /// every workspace found here is stale. Only directories named after a job
    /// id are touched. Failures are logged and reported, never fatal.
    pub fn sweep_stale_temp(&self) -> SweepReport {
        let mut report = SweepReport::default();

        if let Err(e) = self.check_roots() {
            tracing::error!("Skipping temp sweep: {}", e);
            report.failed.push((self.temp_root.clone(), e.to_string()));
            return report;
        }

        let entries = match fs::read_dir(&self.temp_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return report,
            Err(e) => {
                tracing::warn!("Could not read temp root {}: {}", self.temp_root, e);
                report.failed.push((self.temp_root.clone(), e.to_string()));
                return report;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Could not read temp root entry: {}", e);
                    report.failed.push((self.temp_root.clone(), e.to_string()));
                    continue;
                }
            };

            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let is_workspace = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.parse::<JobId>().is_ok());
            if !is_dir || !is_workspace {
                tracing::debug!("Leaving {} in temp root untouched", entry.path().display());
                continue;
            }

            let path = entry.path();
            let shown = Utf8PathBuf::from(path.to_string_lossy().into_owned());
            match remove_dir_if_exists(&path) {
                Ok(()) => {
                    tracing::info!("Removed stale temp workspace {}", shown);
                    report.removed.push(shown);
                }
                Err(e) => {
                    tracing::warn!("Failed to remove stale temp workspace {}: {}", shown, e);
                    report.failed.push((shown, e.to_string()));
                }
            }
        }

        report
    }

    /// Create a fresh workspace for `job_id`, including its output directory.
    pub fn allocate_temp(&self, job_id: JobId) -> Result<TempWorkspace, WorkspaceError> {
        let path = self.temp_root.join(job_id.to_string());
        let alloc_err = |source| WorkspaceError::Allocation {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.temp_root).map_err(alloc_err)?;
        // create_dir, not create_dir_all: an existing directory is an error
        fs::create_dir(&path).map_err(alloc_err)?;

        // From here on the workspace guard owns the directory
        let workspace = TempWorkspace {
            job_id,
            path: path.clone(),
            created_at: Local::now(),
            released: false,
        };

        fs::create_dir(workspace.output_dir()).map_err(alloc_err)?;

        tracing::debug!(job_id = %job_id, "Allocated temp workspace {}", path);
        Ok(workspace)
    }

    /// Recursively delete a workspace. Calling it again, or on a path that is
    /// already gone, is a no-op.
    pub fn release_temp(&self, workspace: &mut TempWorkspace) -> Result<(), WorkspaceError> {
        if workspace.released {
            return Ok(());
        }

        remove_dir_if_exists(workspace.path.as_std_path()).map_err(|source| WorkspaceError::Release {
            path: workspace.path.clone(),
            source,
        })?;

        workspace.released = true;
        tracing::debug!(job_id = %workspace.job_id, "Released temp workspace {}", workspace.path);
        Ok(())
    }

    /// Move the workspace output into a new timestamped result directory.
    pub fn materialize_result(
        &self,
        job_id: JobId,
        workspace: &TempWorkspace,
    ) -> Result<ResultSet, WorkspaceError> {
        self.materialize_result_at(job_id, workspace, Local::now())
    }

    /// [`materialize_result`](Self::materialize_result) with an explicit
    /// completion time.
    pub fn materialize_result_at(
        &self,
        job_id: JobId,
        workspace: &TempWorkspace,
        completed_at: DateTime<Local>,
    ) -> Result<ResultSet, WorkspaceError> {
        let path = self.reserve_result_dir(completed_at)?;

        if let Err(source) = move_dir_contents(&workspace.output_dir(), &path) {
            // No partial ResultSet for a failed save
            if let Err(e) = fs::remove_dir_all(&path) {
                tracing::warn!("Failed to remove incomplete result directory {}: {}", path, e);
            }
            return Err(WorkspaceError::Materialize { path, source });
        }

        tracing::info!(job_id = %job_id, "Results saved to {}", path);

        Ok(ResultSet {
            job_id,
            path,
            completed_at,
        })
    }

    /// Claim `facesort_<timestamp>`, or the first free `facesort_<timestamp>_<n>`.
    fn reserve_result_dir(&self, completed_at: DateTime<Local>) -> Result<Utf8PathBuf, WorkspaceError> {
        fs::create_dir_all(&self.results_root).map_err(|source| WorkspaceError::Materialize {
            path: self.results_root.clone(),
            source,
        })?;

        let base = format!("{}{}", RESULT_PREFIX, completed_at.format(RESULT_TIMESTAMP_FORMAT));

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let name = if attempt == 0 {
                base.clone()
            } else {
                format!("{}_{}", base, attempt)
            };
            let candidate = self.results_root.join(&name);

            match fs::create_dir(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => {
                    return Err(WorkspaceError::Materialize {
                        path: candidate,
                        source,
                    });
                }
            }
        }

        Err(WorkspaceError::NamesExhausted(base))
    }

    /// Existing result directories, newest first.
    pub fn list_results(&self) -> io::Result<Vec<Utf8PathBuf>> {
        let entries = match fs::read_dir(&self.results_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut results: Vec<(NaiveDateTime, u64, Utf8PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if let Some((stamp, suffix)) = parse_result_name(&name) {
                results.push((stamp, suffix, self.results_root.join(&name)));
            }
        }

        results.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));
        Ok(results.into_iter().map(|(_, _, path)| path).collect())
    }
}

/// Split `facesort_20250102_030405_2` into its timestamp and counter.
fn parse_result_name(name: &str) -> Option<(NaiveDateTime, u64)> {
    let rest = name.strip_prefix(RESULT_PREFIX)?;
    let stamp = rest.get(..15)?;
    let stamp = NaiveDateTime::parse_from_str(stamp, RESULT_TIMESTAMP_FORMAT).ok()?;

    let suffix = match &rest[15..] {
        "" => 0,
        tail => tail.strip_prefix('_')?.parse().ok()?,
    };

    Some((stamp, suffix))
}

fn remove_dir_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Move every entry of `src` into `dst`, copying when a rename is not possible
/// (for example across filesystems).
fn move_dir_contents(src: &Utf8Path, dst: &Utf8Path) -> io::Result<()> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.as_std_path().join(entry.file_name());

        if let Err(rename_err) = fs::rename(&from, &to) {
            tracing::debug!(
                "Rename {} failed ({}), copying instead",
                from.display(),
                rename_err
            );
            copy_recursively(&from, &to)?;
        }
    }
    Ok(())
}

fn copy_recursively(from: &Path, to: &Path) -> io::Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(io::Error::other)?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
