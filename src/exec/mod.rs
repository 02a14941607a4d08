// src/exec/mod.rs

//! Process execution layer.
//!
//! This module is responsible for actually running stagebuild, using
//! `tokio::process::Command`, and for the progress side channel the child
//! reports on while it runs.
//!
//! - [`command`] owns the supervisor: it spawns the process, feeds it the
//!   manifest, and reconciles exit status against captured output.
//! - [`monitor`] contains the side-channel plumbing: record-separator
//!   framing, the background reader task, and the pipe handed to the child.

pub mod command;
pub mod monitor;

pub use command::{ExecOptions, ExecutionResult, PIPELINE_TOOL, query_version, run_pipeline};
pub use monitor::{FrameSplitter, MONITOR_FD, ProgressMonitor, RECORD_SEPARATOR, read_progress};
