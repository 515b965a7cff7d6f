//! Stream collectors.
//!
//! Each collector drains one of the child's output pipes on its own thread,
//! strictly in arrival order, until end of stream:
//!
//! ```text
//!   child stdout ──► stdout::drain ──► classify ──┬─► Aggregator (summary)
//!                                                 └─► wrapper stdout (raw)
//!
//!   child stderr ──► stderr::drain ──► prompt echo ──► wrapper stderr
//!                                  └─► classify ──┬─► Aggregator (errors)
//!                                                 └─► wrapper stderr (raw)
//! ```
//!
//! A collector never stops early: the child may still be writing, and an
//! undrained pipe would block it.

pub mod stderr;
pub mod stdout;

use std::io::{self, Write};

use tracing::warn;

/// Give up on a stream after this many read failures in a row.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 16;

/// Per-stream counters returned when a collector reaches end of stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Complete or final lines seen.
    pub lines: u64,
    /// `summary` events applied.
    pub summaries: u64,
    /// `status` events discarded.
    pub status: u64,
    /// `error` events counted (stderr) or discarded (stdout).
    pub errors: u64,
    /// Lines forwarded verbatim.
    pub passthrough: u64,
    /// Password prompts echoed.
    pub prompts: u64,
    /// Non-EOF read failures.
    pub read_errors: u64,
}

/// Tracks read failures of one stream.
///
/// `Interrupted` is retried silently; other errors are reported and the
/// drain continues until too many fail back to back.
pub(crate) struct ReadErrors {
    stream: &'static str,
    consecutive: u32,
}

impl ReadErrors {
    pub(crate) fn new(stream: &'static str) -> Self {
        Self {
            stream,
            consecutive: 0,
        }
    }

    /// Records a failed read. Returns `false` once the stream should be
    /// treated as closed.
    pub(crate) fn record(&mut self, err: &io::Error, report: &mut DrainReport) -> bool {
        if err.kind() == io::ErrorKind::Interrupted {
            return true;
        }
        report.read_errors += 1;
        self.consecutive += 1;
        warn!(stream = self.stream, error = %err, "read from child failed");

        if self.consecutive >= MAX_CONSECUTIVE_READ_ERRORS {
            warn!(
                stream = self.stream,
                failures = self.consecutive,
                "giving up on child stream"
            );
            return false;
        }
        true
    }

    pub(crate) fn reset(&mut self) {
        self.consecutive = 0;
    }
}

/// Forwards raw bytes to one of the wrapper's own streams.
///
/// A failing destination (closed terminal, broken pipe) must not stop the
/// drain, so errors are logged once and further output is dropped.
pub(crate) struct Passthrough<W: Write> {
    stream: &'static str,
    out: W,
    broken: bool,
}

impl<W: Write> Passthrough<W> {
    pub(crate) fn new(stream: &'static str, out: W) -> Self {
        Self {
            stream,
            out,
            broken: false,
        }
    }

    pub(crate) fn forward(&mut self, bytes: &[u8]) {
        if self.broken {
            return;
        }
        if let Err(e) = self.out.write_all(bytes).and_then(|_| self.out.flush()) {
            warn!(stream = self.stream, error = %e, "passthrough failed, dropping further output");
            self.broken = true;
        }
    }
}
