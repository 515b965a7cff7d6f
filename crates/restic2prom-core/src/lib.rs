//! restic2prom-core — restic JSON output to Prometheus textfile.
//!
//! Provides:
//! - `event` — restic `--json` message types and line classification
//! - `metrics` — label identity, metric families, the run [`Aggregator`]
//! - `collector` — stdout/stderr stream drains with passthrough
//! - `exposition` — atomic `.prom` textfile writer
//! - `config` — run configuration recovered from the restic command line
//! - `supervisor` — child process lifecycle and the collector join barrier

pub mod collector;
pub mod config;
pub mod event;
pub mod exposition;
pub mod metrics;
pub mod supervisor;

pub use config::{ConfigError, RunConfig};
pub use exposition::{ExpositionError, TextfileWriter};
pub use metrics::{Aggregator, ExpositionKind, LabelIdentity, MetricsError};
pub use supervisor::{RunOutcome, SupervisorError};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
