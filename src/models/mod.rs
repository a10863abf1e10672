//! Data models for FaceSort.
//!
//! - [`Job`], [`JobId`], [`JobState`], [`JobLogEntry`]: one queued folder-processing request
//! - [`FolderSelection`], [`SelectionSource`]: a validated folder and where it came from
//! - [`UserConfig`]: user settings loaded from `FaceSort Config.yaml`
//!
//! Jobs are only mutated through [`JobQueue`](crate::queue::JobQueue); everything
//! here is `Clone` and serializable so the interface layer can hold snapshots.

pub mod config;
pub mod job;

pub use config::{ClusteringParams, PipelineSettings, RESULTS_DIR_NAME, TEMP_DIR_NAME, UserConfig};
pub use job::{FolderSelection, Job, JobId, JobLogEntry, JobState, SelectionSource};
