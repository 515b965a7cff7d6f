//! Stdout collector.
//!
//! restic `--json` writes status and summary messages to stdout. The summary
//! is applied to the aggregator; everything that is not a known message is
//! copied to the wrapper's stdout so tools tailing the raw output keep
//! working.

use std::io::{BufRead, Write};

use tracing::{debug, trace};

use super::{DrainReport, Passthrough, ReadErrors};
use crate::event::{Event, Line, classify};
use crate::metrics::Aggregator;

/// Drains `reader` to end of stream.
pub fn drain<R: BufRead, W: Write>(mut reader: R, out: W, aggregator: &Aggregator) -> DrainReport {
    let mut report = DrainReport::default();
    let mut errors = ReadErrors::new("stdout");
    let mut passthrough = Passthrough::new("stdout", out);
    let mut line = Vec::new();

    loop {
        // On a failed read, bytes already taken stay in `line` and are
        // completed by the next successful read.
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                if !line.is_empty() {
                    handle_line(&line, aggregator, &mut passthrough, &mut report);
                }
                break;
            }
            Ok(_) => {
                errors.reset();
                if line.last() != Some(&b'\n') {
                    // Final unterminated line; EOF follows.
                    continue;
                }
                handle_line(&line, aggregator, &mut passthrough, &mut report);
                line.clear();
            }
            Err(e) => {
                if !errors.record(&e, &mut report) {
                    if !line.is_empty() {
                        handle_line(&line, aggregator, &mut passthrough, &mut report);
                    }
                    break;
                }
            }
        }
    }

    debug!(?report, "stdout drained");
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
        Line::Event(Event::Summary(summary)) => {
            report.summaries += 1;
            aggregator.record_summary(&summary);
        }
        Line::Event(Event::Status(status)) => {
            report.status += 1;
            trace!(
                files_done = status.files_done,
                bytes_done = status.bytes_done,
                "status"
            );
        }
        Line::Event(Event::Error(error)) => {
            // Errors are counted from stderr only.
            report.errors += 1;
            debug!(error = %error.describe(), "error message on stdout ignored");
        }
        Line::Raw(raw) => {
            report.passthrough += 1;
            passthrough.forward(raw);
        }
    }
}
