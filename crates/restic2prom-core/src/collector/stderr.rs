//! Stderr collector.
//!
//! restic reports per-file failures as `error` messages on stderr, mixed with
//! plain diagnostics and, for interactive runs, the password prompt. The
//! prompt has no trailing newline, so it is echoed as soon as it shows up
//! instead of waiting for a complete line.

use std::io::{BufRead, Write};

use tracing::debug;

use super::{DrainReport, Passthrough, ReadErrors};
use crate::event::{Event, Line, classify};
use crate::metrics::Aggregator;

/// Prompt restic prints when it needs the repository password.
pub const PASSWORD_PROMPT: &[u8] = b"enter password for repository: ";

/// Drains `reader` to end of stream, then publishes the error count.
pub fn drain<R: BufRead, W: Write>(mut reader: R, out: W, aggregator: &Aggregator) -> DrainReport {
    let mut report = DrainReport::default();
    let mut errors = ReadErrors::new("stderr");
    let mut passthrough = Passthrough::new("stderr", out);
    // Bytes received but not yet handled: at most one partial line.
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let read = match reader.fill_buf() {
            Ok(chunk) => {
                pending.extend_from_slice(chunk);
                chunk.len()
            }
            Err(e) => {
                if errors.record(&e, &mut report) {
                    continue;
                }
                break;
            }
        };
        if read == 0 {
            break;
        }
        reader.consume(read);
        errors.reset();

        let mut start = 0;
        while let Some(pos) = pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos + 1;
            handle_line(&pending[start..end], aggregator, &mut passthrough, &mut report);
            start = end;
        }
        pending.drain(..start);

        if pending.starts_with(PASSWORD_PROMPT) {
            report.prompts += 1;
            passthrough.forward(&pending);
            pending.clear();
        }
    }

    if !pending.is_empty() {
        handle_line(&pending, aggregator, &mut passthrough, &mut report);
    }

    aggregator.publish_error_count();
    debug!(?report, errors = aggregator.error_count(), "stderr drained");
    report
}

fn handle_line<W: Write>(
    line: &[u8],
    aggregator: &Aggregator,
    passthrough: &mut Passthrough<W>,
    report: &mut DrainReport,
) {
    report.lines += 1;
    match classify(line) {
        Line::Event(Event::Error(error)) => {
            report.errors += 1;
            let total = aggregator.record_error();
            debug!(total, error = %error.describe(), "backup error");
        }
        Line::Event(Event::Summary(_)) => {
            report.summaries += 1;
            debug!("summary message on stderr ignored");
        }
        Line::Event(Event::Status(_)) => {
            report.status += 1;
        }
        Line::Raw(raw) => {
            report.passthrough += 1;
            passthrough.forward(raw);
        }
    }
}
