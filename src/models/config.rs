use anyhow::{Context, Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default name of the permanent results root inside the home directory
pub const RESULTS_DIR_NAME: &str = "FaceSort_Results";

/// Default name of the temporary workspace root inside the home directory
pub const TEMP_DIR_NAME: &str = "FaceSort_Temp";

/// User configuration from `FaceSort Config.yaml`
///
/// Every field has a default, so a partial (or missing) file is valid.
/// Individual keys can be overridden with `FACESORT_*` environment variables,
/// see [`ConfigManager`](crate::config::ConfigManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Permanent results root; empty means `~/FaceSort_Results`
    pub results_root: String,

    /// Temporary workspace root; empty means `~/FaceSort_Temp`
    pub temp_root: String,

    /// Directory for rotating log files
    pub log_dir: String,

    /// Number of concurrent processing workers
    pub workers: usize,

    /// Finished jobs kept in memory; older ones are pruned
    pub finished_job_retention: usize,

    /// Maximum runtime of a single pipeline invocation
    pub pipeline_timeout_secs: u64,

    pub debug_mode: bool,

    /// Title shown by native folder pickers
    pub dialog_title: String,

    pub pipeline: PipelineSettings,

    pub clustering: ClusteringParams,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            results_root: String::new(),
            temp_root: String::new(),
            log_dir: "logs".to_string(),
            workers: 1,
            finished_job_retention: 500,
            pipeline_timeout_secs: 3600,
            debug_mode: false,
            dialog_title: "Select a folder with photos".to_string(),
            pipeline: PipelineSettings::default(),
            clustering: ClusteringParams::default(),
        }
    }
}

impl UserConfig {
    /// Resolve the results root, falling back to `~/FaceSort_Results`.
    ///
    /// `~` is expanded and relative paths are anchored at `base`.
    pub fn results_root_path(&self, base: &Utf8Path) -> Result<Utf8PathBuf> {
        resolve_root(&self.results_root, RESULTS_DIR_NAME, base)
    }

    /// Resolve the temp root, falling back to `~/FaceSort_Temp`.
    pub fn temp_root_path(&self, base: &Utf8Path) -> Result<Utf8PathBuf> {
        resolve_root(&self.temp_root, TEMP_DIR_NAME, base)
    }

    /// Worker count, never less than one.
    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }

    pub fn pipeline_timeout(&self) -> Duration {
        Duration::from_secs(self.pipeline_timeout_secs)
    }
}

fn resolve_root(configured: &str, default_name: &str, base: &Utf8Path) -> Result<Utf8PathBuf> {
    if configured.trim().is_empty() {
        return Ok(home_dir()?.join(default_name));
    }
    resolve_path(configured, base)
}

/// Expand a leading `~` and anchor relative paths at `base`.
pub fn resolve_path(path: &str, base: &Utf8Path) -> Result<Utf8PathBuf> {
    let path = path.trim();

    let expanded = if path == "~" {
        home_dir()?
    } else if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        home_dir()?.join(rest)
    } else {
        Utf8PathBuf::from(path)
    };

    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(base.join(expanded))
    }
}

fn home_dir() -> Result<Utf8PathBuf> {
    let home = dirs::home_dir().context("Could not determine the home directory")?;
    Utf8PathBuf::from_path_buf(home).map_err(|p| anyhow!("Home directory is not valid UTF-8: {}", p.display()))
}

/// External face-sorting command.
///
/// `args` may contain placeholders that are substituted per job:
/// `{input}`, `{output}`, `{workspace}`, `{job_id}` and every
/// [`ClusteringParams`] field name (`{eps_sim}`, `{min_samples}`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let args = [
            "photo_cluster_router.py",
            "--input-dir",
            "{input}",
            "--out-dir",
            "{output}",
            "--eps-sim",
            "{eps_sim}",
            "--min-samples",
            "{min_samples}",
            "--min-face",
            "{min_face}",
            "--blur-thr",
            "{blur_thr}",
            "--det-size",
            "{det_size}",
            "--gpu-id",
            "{gpu_id}",
            "--group-thr",
            "{group_thr}",
        ];

        Self {
            program: "python3".to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// Tuning knobs forwarded to the face-sorting pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringParams {
    /// Cosine similarity radius for DBSCAN
    pub eps_sim: f64,
    pub min_samples: u32,
    /// Minimum face size in pixels
    pub min_face: u32,
    /// Laplacian variance below which a face is considered blurry
    pub blur_thr: f64,
    pub det_size: u32,
    pub gpu_id: i32,
    /// Photos with more faces than this count as group photos
    pub group_thr: u32,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self {
            eps_sim: 0.55,
            min_samples: 2,
            min_face: 110,
            blur_thr: 45.0,
            det_size: 640,
            gpu_id: 0,
            group_thr: 3,
        }
    }
}

impl ClusteringParams {
    /// Placeholder name and rendered value pairs
    pub fn placeholders(&self) -> Vec<(&'static str, String)> {
        vec![
            ("eps_sim", self.eps_sim.to_string()),
            ("min_samples", self.min_samples.to_string()),
            ("min_face", self.min_face.to_string()),
            ("blur_thr", self.blur_thr.to_string()),
            ("det_size", self.det_size.to_string()),
            ("gpu_id", self.gpu_id.to_string()),
            ("group_thr", self.group_thr.to_string()),
        ]
    }
}
