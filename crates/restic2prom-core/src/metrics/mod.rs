//! Metric aggregation.
//!
//! The [`Aggregator`] owns an explicit `prometheus::Registry` (one per run,
//! never the process-global default) together with the pre-resolved series
//! for the run's [`LabelIdentity`]. Both collectors report into it; the
//! exposition writer reads it once both have finished.
//!
//! Writer roles are disjoint: the stdout collector only touches summary
//! families, the stderr collector only the error family. Every update is a
//! lock-free atomic or a short registry-internal write, so no lock is ever
//! held across a blocking read.

pub mod family;
pub mod labels;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use prometheus::{Gauge, Registry};
use tracing::debug;

use crate::event::SummaryEvent;

pub use family::{ExpositionKind, Series};
pub use labels::LabelIdentity;

use family::{ERROR_FAMILY, LAST_SUMMARY_FAMILY, SUMMARY_FAMILIES, register_gauge};

/// Error type for metric setup.
#[derive(Debug)]
pub enum MetricsError {
    /// Label names and values differ in length.
    Arity { names: usize, values: usize },
    /// Rejected by the registry (invalid name, duplicate family, ...).
    Prometheus(prometheus::Error),
}

impl std::fmt::Display for MetricsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricsError::Arity { names, values } => write!(
                f,
                "label arity mismatch: {} names, {} values",
                names, values
            ),
            MetricsError::Prometheus(e) => write!(f, "metric registration failed: {}", e),
        }
    }
}

impl std::error::Error for MetricsError {}

impl From<prometheus::Error> for MetricsError {
    fn from(e: prometheus::Error) -> Self {
        MetricsError::Prometheus(e)
    }
}

/// Live metric state of one backup run.
pub struct Aggregator {
    registry: Registry,
    identity: LabelIdentity,
    summary: Vec<(Series, fn(&SummaryEvent) -> f64)>,
    last_summary: Gauge,
    errors: Series,
    saw_valid_summary: AtomicBool,
    error_count: AtomicU64,
}

impl Aggregator {
    /// Registers every family under `identity`, with summary and error
    /// families exposed as `kind`.
    ///
    /// Fails fast on any label/arity problem so a misconfigured run is
    /// rejected before the child is started.
    pub fn new(identity: LabelIdentity, kind: ExpositionKind) -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let summary = SUMMARY_FAMILIES
            .iter()
            .map(|(spec, extract)| {
                Series::register(&registry, spec, kind, &identity).map(|s| (s, *extract))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let errors = Series::register(&registry, &ERROR_FAMILY, kind, &identity)?;

        let last_summary = register_gauge(&registry, &LAST_SUMMARY_FAMILY, &identity)?;

        Ok(Self {
            registry,
            identity,
            summary,
            last_summary,
            errors,
            saw_valid_summary: AtomicBool::new(false),
            error_count: AtomicU64::new(0),
        })
    }

    /// Applies a summary to every summary-derived family.
    ///
    /// Gauges take the new values outright, so a repeated summary replaces
    /// the previous one instead of adding to it.
    pub fn record_summary(&self, summary: &SummaryEvent) {
        for (series, extract) in &self.summary {
            series.update(extract(summary));
        }
        self.last_summary
            .set(Utc::now().timestamp_millis() as f64 / 1000.0);
        self.saw_valid_summary.store(true, Ordering::Release);

        debug!(
            snapshot = summary.snapshot_id.as_deref().unwrap_or("-"),
            files_new = summary.files_new,
            files_changed = summary.files_changed,
            data_added = summary.data_added,
            "recorded backup summary"
        );
    }

    /// Counts one error event; returns the running total.
    pub fn record_error(&self) -> u64 {
        self.error_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Publishes the final error count to the error family.
    ///
    /// Called once by the stderr collector at end of stream.
    pub fn publish_error_count(&self) {
        self.errors.update(self.error_count() as f64);
    }

    pub fn saw_valid_summary(&self) -> bool {
        self.saw_valid_summary.load(Ordering::Acquire)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn identity(&self) -> &LabelIdentity {
        &self.identity
    }
}
