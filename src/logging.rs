// src/logging.rs

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! The log level comes from the `STAGERUN_LOG` environment variable
//! (e.g. "info", "debug"), defaulting to `info`.

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

/// Initialise the global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging() -> Result<()> {
    let filter =
        EnvFilter::try_from_env("STAGERUN_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    Ok(())
}
