use crate::models::{ClusteringParams, JobId, UserConfig};
use crate::queue::JobLogger;
use async_trait::async_trait;
use camino::Utf8PathBuf;
use regex::Regex;
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// Line the face-sorting script prints when nothing usable was detected
pub const NO_FACES_MARKER: &str = "No usable faces found";

/// Everything the pipeline needs to process one job
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRequest {
    pub job_id: JobId,
    /// Folder with the user's photos; read-only
    pub input: Utf8PathBuf,
    /// Job scratch directory
    pub workspace: Utf8PathBuf,
    /// Where sorted output must be written (inside `workspace`)
    pub output: Utf8PathBuf,
}

/// What a successful run reported on its output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineReport {
    /// Person directories announced as `  <name> (cluster N)`
    pub clusters: Vec<String>,
    /// Path from the `Report: <path>` line, if any
    pub report_path: Option<Utf8PathBuf>,
    /// Number of output lines seen
    pub lines: usize,
}

impl PipelineReport {
    pub fn summary(&self) -> String {
        match self.clusters.len() {
            0 => "no person clusters".to_string(),
            1 => "1 person cluster".to_string(),
            n => format!("{} person clusters", n),
        }
    }
}

/// Errors that can occur while running the face-sorting pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No images found in {0}")]
    NoImages(Utf8PathBuf),

    #[error("No usable faces found")]
    NoFaces,

    #[error("Pipeline timed out after {0:?}")]
    Timeout(Duration),

    #[error("Pipeline exited with {}: {detail}", exit_label(.code))]
    Exit { code: Option<i32>, detail: String },

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Processing error: {0}")]
    Processing(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// External face-sorting step.
///
/// Implementations read `request.input`, write into `request.output` and
/// report progress through `log`. They must not touch anything else.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FacePipeline: Send + Sync {
    async fn run(&self, request: &PipelineRequest, log: &JobLogger) -> Result<PipelineReport, PipelineError>;
}

/// Runs the face-sorting script as a child process.
///
/// Arguments are rendered from a template; `{input}`, `{output}`,
/// `{workspace}`, `{job_id}` and the [`ClusteringParams`] names are replaced
/// per job. stdout and stderr are merged line by line into the job log.
pub struct CommandPipeline {
    program: String,
    args: Vec<String>,
    params: ClusteringParams,
    timeout: Duration,

    /// `  <name> (cluster N)` lines
    cluster_pattern: Regex,

    /// `Report: <path>` line
    report_pattern: Regex,
}

impl CommandPipeline {
    pub fn new(program: impl Into<String>, args: Vec<String>, params: ClusteringParams, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            params,
            timeout,
            cluster_pattern: Regex::new(r"^\s+(\S.*?) \(cluster -?\d+\)$").expect("Invalid cluster regex"),
            report_pattern: Regex::new(r"^Report:\s*(\S.*)$").expect("Invalid report regex"),
        }
    }

    pub fn from_config(config: &UserConfig) -> Self {
        Self::new(
            config.pipeline.program.clone(),
            config.pipeline.args.clone(),
            config.clustering.clone(),
            config.pipeline_timeout(),
        )
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Render the argument template for one request
    pub fn build_args(&self, request: &PipelineRequest) -> Vec<String> {
        let mut values: Vec<(&str, String)> = vec![
            ("input", request.input.to_string()),
            ("output", request.output.to_string()),
            ("workspace", request.workspace.to_string()),
            ("job_id", request.job_id.to_string()),
        ];
        values.extend(self.params.placeholders());

        self.args
            .iter()
            .map(|arg| {
                values.iter().fold(arg.clone(), |acc, (name, value)| {
                    acc.replace(&format!("{{{}}}", name), value)
                })
            })
            .collect()
    }

    fn observe(&self, line: &str, report: &mut PipelineReport) -> bool {
        report.lines += 1;

        if let Some(caps) = self.cluster_pattern.captures(line) {
            report.clusters.push(caps[1].to_string());
        } else if let Some(caps) = self.report_pattern.captures(line) {
            report.report_path = Some(Utf8PathBuf::from(caps[1].trim()));
        }

        line.contains(NO_FACES_MARKER)
    }
}

#[async_trait]
impl FacePipeline for CommandPipeline {
    async fn run(&self, request: &PipelineRequest, log: &JobLogger) -> Result<PipelineReport, PipelineError> {
        let args = self.build_args(request);
        tracing::info!(job_id = %request.job_id, "Executing: {} {}", self.program, args.join(" "));
        log.push(format!("Starting {}", self.program));

        let start = Instant::now();

        let mut child = Command::new(&self.program)
            .args(&args)
            .current_dir(&request.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PipelineError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        let mut report = PipelineReport::default();
        let mut no_faces = false;
        let mut last_line = String::new();

        let finished = timeout(self.timeout, async {
            while let Some(line) = rx.recv().await {
                no_faces |= self.observe(&line, &mut report);
                if !line.trim().is_empty() {
                    last_line = line.trim().to_string();
                    log.push(line);
                }
            }
            child.wait().await
        })
        .await;

        let status = match finished {
            Ok(status) => status?,
            Err(_) => {
                tracing::warn!(job_id = %request.job_id, "Pipeline timed out after {:?}", self.timeout);
                if let Err(e) = child.kill().await {
                    tracing::warn!(job_id = %request.job_id, "Failed to kill pipeline process: {}", e);
                }
                return Err(PipelineError::Timeout(self.timeout));
            }
        };

        tracing::info!(
            job_id = %request.job_id,
            "Pipeline completed in {:.2}s with {}",
            start.elapsed().as_secs_f32(),
            exit_label(&status.code())
        );

        if no_faces {
            return Err(PipelineError::NoFaces);
        }

        if !status.success() {
            return Err(PipelineError::Exit {
                code: status.code(),
                detail: last_line,
            });
        }

        Ok(report)
    }
}

/// Send every line of `reader` to `tx`, tolerating non-UTF-8 output.
async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut segments = BufReader::new(reader).split(b'\n');

    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let line = String::from_utf8_lossy(&bytes).trim_end().to_string();
                if tx.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("Stopped reading pipeline output: {}", e);
                break;
            }
        }
    }
}
