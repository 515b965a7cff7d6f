//! Textfile exposition.
//!
//! Renders the aggregator's registry in the Prometheus text format and
//! publishes it for the node-exporter textfile collector. The file is
//! regenerated in full on every write and replaced atomically via a `.tmp`
//! sibling, so a scraper never reads a half-written file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use prometheus::{Encoder, Registry, TextEncoder};
use tracing::{debug, info};

use crate::metrics::Aggregator;

/// Required suffix for textfile collector inputs.
pub const TEXTFILE_EXTENSION: &str = "prom";

/// Error type for exposition writes.
#[derive(Debug)]
pub enum ExpositionError {
    /// No `summary` message was seen; nothing was written.
    NoSummary,
    /// Encoding the registry failed.
    Encode(prometheus::Error),
    /// Writing or renaming the file failed.
    Io(io::Error),
}

impl std::fmt::Display for ExpositionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpositionError::NoSummary => write!(
                f,
                "Did not receive JSON metrics. Missed to add '--json' flag?"
            ),
            ExpositionError::Encode(e) => write!(f, "encoding metrics failed: {}", e),
            ExpositionError::Io(e) => write!(f, "writing textfile failed: {}", e),
        }
    }
}

impl std::error::Error for ExpositionError {}

impl From<io::Error> for ExpositionError {
    fn from(e: io::Error) -> Self {
        ExpositionError::Io(e)
    }
}

impl From<prometheus::Error> for ExpositionError {
    fn from(e: prometheus::Error) -> Self {
        ExpositionError::Encode(e)
    }
}

/// Encodes every family of `registry` in the text exposition format.
///
/// Output is deterministic for a given registry state: families come out
/// sorted by name and label pairs sorted by label name.
pub fn render(registry: &Registry) -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder.encode(&registry.gather(), &mut buf)?;
    Ok(buf)
}

/// Writes the metrics textfile for one run.
#[derive(Debug, Clone)]
pub struct TextfileWriter {
    path: PathBuf,
}

impl TextfileWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Temporary sibling used while writing. Lives in the same directory so
    /// the final rename never crosses a filesystem, and does not end in
    /// `.prom` so the textfile collector ignores it.
    pub fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Publishes the aggregator's registry.
    ///
    /// Must only be called once both collectors have drained their streams.
    /// Returns [`ExpositionError::NoSummary`] without touching the filesystem
    /// when no summary was observed.
    pub fn write(&self, aggregator: &Aggregator) -> Result<(), ExpositionError> {
        if !aggregator.saw_valid_summary() {
            return Err(ExpositionError::NoSummary);
        }

        let body = render(aggregator.registry())?;
        self.write_tmp(&body)?;
        self.commit()?;

        info!(
            path = %self.path.display(),
            bytes = body.len(),
            "metrics written"
        );
        Ok(())
    }

    /// Writes `body` to the temporary file and syncs it to disk.
    fn write_tmp(&self, body: &[u8]) -> io::Result<()> {
        let tmp_path = self.tmp_path();
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(body)?;
        file.sync_all()?;
        debug!(path = %tmp_path.display(), "temporary textfile synced");
        Ok(())
    }

    /// Atomically replaces the destination with the temporary file.
    fn commit(&self) -> io::Result<()> {
        fs::rename(self.tmp_path(), &self.path)
    }
}
