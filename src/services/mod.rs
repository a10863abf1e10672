//! Services: folder selection, pipeline invocation and on-disk lifecycle.
//!
//! Nothing in here knows about the queue's locking or the worker loop; every
//! service takes explicit inputs and can be tested on its own.
//!
//! # Components
//!
//! - [`NativeDialogAdapter`]: capability-checked access to the platform's
//!   folder picker (`zenity`/`kdialog`, `osascript`, the Windows common dialog)
//! - [`FolderSelectionService`]: turns dialog output or typed paths into a
//!   validated [`FolderSelection`](crate::models::FolderSelection)
//! - [`FacePipeline`] / [`CommandPipeline`]: the external face-sorting step
//! - [`ResultLifecycleManager`]: per-job temp workspaces, timestamped result
//!   directories and the startup sweep
//!
//! # Usage Example
//!
//! ```ignore
//! use facesort::models::SelectionSource;
//! use facesort::services::{FolderSelectionService, ResultLifecycleManager};
//!
//! let selection = FolderSelectionService::new()
//!     .select(SelectionSource::ManualEntry, "~/Pictures/Holiday")?;
//!
//! let lifecycle = ResultLifecycleManager::new("/tmp/FaceSort_Temp", "/data/FaceSort_Results");
//! let mut workspace = lifecycle.allocate_temp(job_id)?;
//! // ... run the pipeline into workspace.output_dir() ...
//! let result = lifecycle.materialize_result(job_id, &workspace)?;
//! lifecycle.release_temp(&mut workspace)?;
//! ```

pub mod dialog;
pub mod pipeline;
pub mod selection;
pub mod workspace;

pub use dialog::{DialogBackend, DialogCapability, DialogError, NativeDialogAdapter};
pub use pipeline::{CommandPipeline, FacePipeline, PipelineError, PipelineReport, PipelineRequest};
pub use selection::{FolderSelectionService, IMAGE_EXTENSIONS, InvalidReason, SelectionError, count_images, is_image};
pub use workspace::{ResultLifecycleManager, ResultSet, SweepReport, TempWorkspace, WorkspaceError};
