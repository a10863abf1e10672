// FaceSort - folder selection and batch processing queue for face sorting
//
// This is the library crate containing the queue, workers and services.
// The binary crate (main.rs) provides the command-line entry point.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod queue;
pub mod services;
pub mod worker;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use metrics::Metrics;
pub use models::{FolderSelection, Job, JobId, JobState, SelectionSource, UserConfig};
pub use orchestrator::{Orchestrator, SubmitError};
pub use queue::{JobLogger, JobQueue, QueueError, QueueEvent};
pub use worker::{JobFailure, ProcessingWorker};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
