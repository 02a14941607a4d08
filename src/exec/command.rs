// src/exec/command.rs

//! Pipeline process supervisor.
//!
//! Runs one stagebuild invocation start to finish: builds the argument list,
//! wires the progress side channel, streams the manifest to the child's
//! stdin, pumps stdout/stderr, and reconciles the exit status against the
//! captured output.

use std::ffi::OsStr;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::{Result, StagerunError};
use crate::exec::monitor::ProgressMonitor;

/// Binary name of the pipeline build tool this crate supervises.
pub const PIPELINE_TOOL: &str = "stagebuild";

/// `stagebuild --version` prints `"stagebuild VERSION\n"`.
const VERSION_PREFIX: &str = "stagebuild ";

/// Everything that varies between pipeline runs.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Tool binary to invoke. Defaults to [`PIPELINE_TOOL`]; tests point
    /// this at a stand-in script.
    pub program: PathBuf,
    /// Object store directory handed to the tool via `--store`.
    pub store_dir: PathBuf,
    /// Artifact directory handed to the tool via `--output-directory`.
    pub output_dir: PathBuf,
    /// Pipeline names to export, one `--export` flag each.
    pub exports: Vec<String>,
    /// Pipeline names to checkpoint, one `--checkpoint` flag each.
    pub checkpoints: Vec<String>,
    /// Extra environment entries layered on top of the inherited environment.
    pub extra_env: Vec<(String, String)>,
    /// Request a structured JSON result on stdout (`--json`). When false,
    /// the child's stdout passes through to ours.
    pub want_result: bool,
}

impl ExecOptions {
    pub fn new(store_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: PathBuf::from(PIPELINE_TOOL),
            store_dir: store_dir.into(),
            output_dir: output_dir.into(),
            exports: Vec::new(),
            checkpoints: Vec::new(),
            extra_env: Vec::new(),
            want_result: false,
        }
    }
}

/// Decoded output of a `--json` run.
///
/// The document's shape is owned by the tool; this crate only requires that
/// it decodes as JSON. Pipeline success or failure is reported inside it,
/// not through the process exit status.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct ExecutionResult(pub serde_json::Value);

impl ExecutionResult {
    /// The tool's top-level `success` flag, when present.
    pub fn success(&self) -> Option<bool> {
        self.0.get("success").and_then(serde_json::Value::as_bool)
    }

    pub fn into_value(self) -> serde_json::Value {
        self.0
    }
}

/// Run one stagebuild instance, returning the decoded result when requested.
///
/// stagebuild exits non-zero when the pipeline fails. That alone is not an
/// error here: when a JSON result was requested and decodes cleanly, the
/// failure travels inside the result document together with its logs, and
/// the exit status is ignored. Without a decodable result the non-zero exit
/// is surfaced as [`StagerunError::Exit`].
///
/// The child's stderr is forwarded to `error_sink`. Progress updates from
/// the side channel are rendered to this process's stderr as they arrive; if
/// the side channel cannot be set up the run proceeds without progress.
pub async fn run_pipeline<W>(
    manifest: &[u8],
    opts: &ExecOptions,
    mut error_sink: W,
) -> Result<Option<ExecutionResult>>
where
    W: AsyncWrite + Unpin,
{
    let mut cmd = Command::new(&opts.program);
    cmd.arg("--store")
        .arg(&opts.store_dir)
        .arg("--output-directory")
        .arg(&opts.output_dir)
        .arg("-");

    // Progress is best-effort: a failure here downgrades the run, never
    // aborts it.
    let monitor = match ProgressMonitor::set_up() {
        Ok(monitor) => {
            monitor.configure_command(&mut cmd);
            Some(monitor)
        }
        Err(err) => {
            warn!(error = %err, "error creating progress pipe; continuing without progress");
            None
        }
    };

    for export in &opts.exports {
        cmd.arg("--export").arg(export);
    }
    for checkpoint in &opts.checkpoints {
        cmd.arg("--checkpoint").arg(checkpoint);
    }

    if opts.want_result {
        cmd.arg("--json");
        cmd.stdout(Stdio::piped());
    } else {
        cmd.stdout(Stdio::inherit());
    }

    if !opts.extra_env.is_empty() {
        cmd.envs(opts.extra_env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }

    cmd.stdin(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    info!(
        program = %opts.program.display(),
        exports = opts.exports.len(),
        checkpoints = opts.checkpoints.len(),
        progress = monitor.is_some(),
        "starting pipeline process"
    );

    let mut child = cmd.spawn().map_err(StagerunError::Start)?;

    // The child holds its own duplicate of the pipe write end now. Dropping
    // ours lets the reader observe end-of-stream when the child exits.
    drop(monitor);

    let stdin = child.stdin.take().ok_or_else(|| {
        StagerunError::StdinSetup(io::Error::other("stdin handle missing after spawn"))
    })?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let feed_manifest = feed_manifest(stdin, manifest);
    let capture_stdout = capture_stream(stdout);
    let forward_stderr = async {
        if let Some(mut stderr) = stderr {
            if let Err(err) = tokio::io::copy(&mut stderr, &mut error_sink).await {
                debug!(error = %err, "stderr forwarding ended early");
            }
        }
    };

    // Pump all three pipes together; a one-at-a-time order could deadlock
    // once the child fills an unread pipe buffer.
    let (fed, captured, ()) = tokio::join!(feed_manifest, capture_stdout, forward_stderr);
    fed?;
    let stdout_buf = captured?;

    let status = child.wait().await.map_err(StagerunError::Wait)?;

    info!(
        exit_code = status.code().unwrap_or(-1),
        success = status.success(),
        "pipeline process exited"
    );

    // Decode even when the run failed: a failed pipeline still reports
    // through the result document.
    let result = if opts.want_result {
        if stdout_buf.is_empty() {
            return Err(StagerunError::NoOutput);
        }
        let decoded =
            serde_json::from_slice::<ExecutionResult>(&stdout_buf).map_err(|source| {
                StagerunError::OutputDecode {
                    source,
                    raw: String::from_utf8_lossy(&stdout_buf).into_owned(),
                }
            })?;
        Some(decoded)
    } else {
        None
    };

    match (status.success(), result) {
        (true, result) => Ok(result),
        (false, Some(result)) => Ok(Some(result)),
        (false, None) => Err(StagerunError::Exit(status)),
    }
}

async fn feed_manifest(mut stdin: tokio::process::ChildStdin, manifest: &[u8]) -> Result<()> {
    stdin
        .write_all(manifest)
        .await
        .map_err(StagerunError::ManifestWrite)?;
    stdin
        .shutdown()
        .await
        .map_err(StagerunError::ManifestClose)?;
    // Dropping the handle closes the descriptor; the child sees EOF.
    drop(stdin);
    Ok(())
}

async fn capture_stream<R: AsyncRead + Unpin>(stream: Option<R>) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut stream) = stream {
        stream
            .read_to_end(&mut buf)
            .await
            .map_err(StagerunError::Wait)?;
    }
    Ok(buf)
}

/// Ask the tool for its version.
///
/// Runs `<program> --version`, strips the fixed leading token and
/// surrounding whitespace, and returns the rest. Any run failure surfaces
/// directly.
pub async fn query_version(program: impl AsRef<OsStr>) -> Result<String> {
    let output = Command::new(program)
        .arg("--version")
        .output()
        .await
        .map_err(StagerunError::Start)?;

    if !output.status.success() {
        return Err(StagerunError::Exit(output.status));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let version = stdout.strip_prefix(VERSION_PREFIX).unwrap_or(&stdout);
    Ok(version.trim().to_string())
}
