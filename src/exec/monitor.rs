// src/exec/monitor.rs

//! Progress side channel.
//!
//! stagebuild writes structured progress to an extra file descriptor as a
//! sequence of JSON documents, each terminated by the ASCII record separator
//! (0x1E). This module owns that channel end to end: [`FrameSplitter`] turns
//! an arbitrary byte stream into frames, [`read_progress`] decodes and
//! renders them, and [`ProgressMonitor`] wires a pipe into the child process
//! and runs the reader in the background.
//!
//! Nothing in here can fail the supervised run. Malformed frames are logged
//! and skipped; read errors end the reader loop and nothing else.

use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::progress::ProgressWrapper;

/// Delimiter between progress documents on the side channel.
pub const RECORD_SEPARATOR: u8 = 0x1e;

/// Descriptor number the child sees for the side channel: the first one
/// after stdin/stdout/stderr.
pub const MONITOR_FD: RawFd = 3;

/// Monitor implementation the child is asked to use via `--monitor`.
const MONITOR_NAME: &str = "JSONSeqMonitor";

/// Incremental splitter for a record-separator framed byte stream.
///
/// Input arrives in chunks of whatever size the pipe delivers; frames are
/// only yielded once their separator has been seen, except for the final
/// unterminated frame which [`FrameSplitter::finish`] yields at end of
/// stream.
#[derive(Debug, Default)]
pub struct FrameSplitter {
    buf: Vec<u8>,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of raw bytes into the splitter.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, without its separator.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|&b| b == RECORD_SEPARATOR)?;
        let mut frame: Vec<u8> = self.buf.drain(..=pos).collect();
        frame.pop();
        Some(frame)
    }

    /// Consume the splitter at end of stream, yielding any trailing frame
    /// that was never terminated by a separator.
    pub fn finish(self) -> Option<Vec<u8>> {
        if self.buf.is_empty() { None } else { Some(self.buf) }
    }
}

/// Read the side channel until end of stream, writing one rendered status
/// line per decoded progress document into `sink`.
///
/// Frames that fail to decode are logged and skipped; empty frames (e.g.
/// between a trailing separator and end of stream) are ignored. A read
/// error terminates this loop only — the supervised run is unaffected.
pub async fn read_progress<R, W>(mut channel: R, mut sink: W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut splitter = FrameSplitter::new();
    let mut chunk = [0u8; 4096];

    loop {
        match channel.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                splitter.extend(&chunk[..n]);
                while let Some(frame) = splitter.next_frame() {
                    emit_frame(&frame, &mut sink).await;
                }
            }
            Err(err) => {
                warn!(error = %err, "error reading progress side channel");
                return;
            }
        }
    }

    if let Some(frame) = splitter.finish() {
        emit_frame(&frame, &mut sink).await;
    }

    debug!("progress side channel closed");
}

async fn emit_frame<W: AsyncWrite + Unpin>(frame: &[u8], sink: &mut W) {
    if frame.is_empty() {
        return;
    }

    let update: ProgressWrapper = match serde_json::from_slice(frame) {
        Ok(update) => update,
        Err(err) => {
            warn!(error = %err, "error decoding progress frame; skipping");
            return;
        }
    };

    let line = format!("{}\n", update.render());
    if let Err(err) = sink.write_all(line.as_bytes()).await {
        debug!(error = %err, "progress sink write failed");
    }
}

/// The parent half of the progress side channel.
///
/// Created before the child is spawned; holds the write end destined for the
/// child while the background reader owns the read end. Drop the monitor
/// once the child is running — the child keeps its own duplicate, and the
/// reader sees end-of-stream as soon as the last write end closes.
pub struct ProgressMonitor {
    child_end: OwnedFd,
}

impl ProgressMonitor {
    /// Create the pipe and start the background reader, rendering status
    /// lines to standard error.
    ///
    /// The reader task is deliberately not joined; it exits on its own when
    /// the stream ends.
    pub fn set_up() -> io::Result<Self> {
        let (tx, rx) = pipe::pipe()?;
        let child_end = tx.into_blocking_fd()?;

        tokio::spawn(read_progress(rx, tokio::io::stderr()));

        Ok(Self { child_end })
    }

    /// Make the child inherit the write end on [`MONITOR_FD`] and ask it to
    /// report there.
    pub fn configure_command(&self, cmd: &mut Command) {
        let source_fd = self.child_end.as_raw_fd();

        // Only async-signal-safe calls are allowed in pre_exec; dup2/fcntl
        // qualify. dup2 clears FD_CLOEXEC on the duplicate, but when the
        // pipe already sits on MONITOR_FD the flag must be cleared by hand.
        unsafe {
            cmd.pre_exec(move || {
                if source_fd == MONITOR_FD {
                    let flags = libc::fcntl(MONITOR_FD, libc::F_GETFD);
                    if flags < 0 {
                        return Err(io::Error::last_os_error());
                    }
                    if libc::fcntl(MONITOR_FD, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                        return Err(io::Error::last_os_error());
                    }
                } else if libc::dup2(source_fd, MONITOR_FD) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        cmd.arg("--monitor")
            .arg(MONITOR_NAME)
            .arg("--monitor-fd")
            .arg(MONITOR_FD.to_string());
    }
}
