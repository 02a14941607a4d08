// src/errors.rs

//! Crate-wide error types.
//!
//! One variant per failure kind of the supervisor, so callers can match on
//! exactly the condition they care about. Side-channel problems (progress
//! pipe setup, malformed progress frames) never show up here: they degrade
//! or get skipped inside the reader instead of failing the run.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StagerunError {
    /// The stdin handle for the child was not available after spawn.
    #[error("error setting up stdin for stagebuild: {0}")]
    StdinSetup(#[source] std::io::Error),

    /// Spawning the stagebuild process failed.
    #[error("error starting stagebuild: {0}")]
    Start(#[source] std::io::Error),

    /// Writing the manifest to the child's stdin failed.
    #[error("error writing stagebuild manifest: {0}")]
    ManifestWrite(#[source] std::io::Error),

    /// Closing the child's stdin after the manifest was written failed.
    #[error("error closing stagebuild's stdin: {0}")]
    ManifestClose(#[source] std::io::Error),

    /// A result was requested but the child produced no output at all.
    #[error("stagebuild did not return any output")]
    NoOutput,

    /// The captured output was not a decodable result document.
    #[error("error decoding stagebuild output: {source}\nthe raw output:\n{raw}")]
    OutputDecode {
        #[source]
        source: serde_json::Error,
        raw: String,
    },

    /// Waiting on the child failed at the I/O level.
    #[error("running stagebuild failed: {0}")]
    Wait(#[source] std::io::Error),

    /// The child exited non-zero and no decoded result is available to
    /// carry the failure instead.
    #[error("running stagebuild failed: {0}")]
    Exit(std::process::ExitStatus),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StagerunError>;
