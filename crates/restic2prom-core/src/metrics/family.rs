//! Metric family declarations and per-identity series handles.

use prometheus::{Gauge, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry};

use super::{LabelIdentity, MetricsError};
use crate::event::SummaryEvent;

pub const NAMESPACE: &str = "restic";
pub const SUBSYSTEM: &str = "backup";

/// Exposition type of a family, which also fixes its update semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpositionKind {
    /// Instantaneous value; an update replaces the previous one.
    #[default]
    Gauge,
    /// Distribution; an update is an observation.
    Histogram,
}

/// Histogram buckets: 256, 1024, ... 256 * 4^7.
pub fn histogram_buckets() -> Vec<f64> {
    (0..8).map(|i| 256.0 * 4f64.powi(i)).collect()
}

/// Static description of one family.
pub struct FamilySpec {
    pub name: &'static str,
    pub help: &'static str,
}

/// Summary-derived families and the summary field each one reads.
pub const SUMMARY_FAMILIES: &[(FamilySpec, fn(&SummaryEvent) -> f64)] = &[
    (
        FamilySpec {
            name: "backup_files_new",
            help: "Total number of files added.",
        },
        |s| s.files_new as f64,
    ),
    (
        FamilySpec {
            name: "backup_files_changed",
            help: "Total number of files changed.",
        },
        |s| s.files_changed as f64,
    ),
    (
        FamilySpec {
            name: "backup_files_unmodified",
            help: "Total number of files unmodified.",
        },
        |s| s.files_unmodified as f64,
    ),
    (
        FamilySpec {
            name: "backup_files_processed",
            help: "Total number of files processed.",
        },
        |s| s.total_files_processed as f64,
    ),
    (
        FamilySpec {
            name: "backup_dirs_new",
            help: "Total number of dirs added.",
        },
        |s| s.dirs_new as f64,
    ),
    (
        FamilySpec {
            name: "backup_dirs_changed",
            help: "Total number of dirs changed.",
        },
        |s| s.dirs_changed as f64,
    ),
    (
        FamilySpec {
            name: "backup_dirs_unmodified",
            help: "Total number of dirs unmodified.",
        },
        |s| s.dirs_unmodified as f64,
    ),
    (
        FamilySpec {
            name: "backup_data_blobs",
            help: "Total number of data blobs added.",
        },
        |s| s.data_blobs as f64,
    ),
    (
        FamilySpec {
            name: "backup_tree_blobs",
            help: "Total number of tree blobs added.",
        },
        |s| s.tree_blobs as f64,
    ),
    (
        FamilySpec {
            name: "backup_added_bytes",
            help: "Total number of bytes added.",
        },
        |s| s.data_added as f64,
    ),
    (
        FamilySpec {
            name: "backup_processed_bytes",
            help: "Total number of bytes processed.",
        },
        |s| s.total_bytes_processed as f64,
    ),
    (
        FamilySpec {
            name: "duration_seconds",
            help: "backup duration in seconds",
        },
        |s| s.total_duration,
    ),
];

pub const ERROR_FAMILY: FamilySpec = FamilySpec {
    name: "error_count",
    help: "number of errors occured",
};

pub const LAST_SUMMARY_FAMILY: FamilySpec = FamilySpec {
    name: "last_summary_timestamp_seconds",
    help: "Unix time at which the backup summary was received.",
};

/// Registers `spec` as a gauge family and resolves the series for `identity`.
pub fn register_gauge(
    registry: &Registry,
    spec: &FamilySpec,
    identity: &LabelIdentity,
) -> Result<Gauge, MetricsError> {
    let opts = Opts::new(spec.name, spec.help)
        .namespace(NAMESPACE)
        .subsystem(SUBSYSTEM);
    let vec = GaugeVec::new(opts, &identity.names())?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec.get_metric_with_label_values(&identity.values())?)
}

/// Handle to the single labeled series of one family.
#[derive(Clone)]
pub enum Series {
    Gauge(Gauge),
    Histogram(Histogram),
}

impl Series {
    /// Registers `spec` with `registry` as `kind` and resolves the series
    /// for `identity`.
    pub fn register(
        registry: &Registry,
        spec: &FamilySpec,
        kind: ExpositionKind,
        identity: &LabelIdentity,
    ) -> Result<Self, MetricsError> {
        match kind {
            ExpositionKind::Gauge => Ok(Series::Gauge(register_gauge(registry, spec, identity)?)),
            ExpositionKind::Histogram => {
                let opts = HistogramOpts::new(spec.name, spec.help)
                    .namespace(NAMESPACE)
                    .subsystem(SUBSYSTEM)
                    .buckets(histogram_buckets());
                let vec = HistogramVec::new(opts, &identity.names())?;
                registry.register(Box::new(vec.clone()))?;
                Ok(Series::Histogram(
                    vec.get_metric_with_label_values(&identity.values())?,
                ))
            }
        }
    }

    /// Set for gauges, observe for histograms.
    pub fn update(&self, value: f64) {
        match self {
            Series::Gauge(gauge) => gauge.set(value),
            Series::Histogram(histogram) => histogram.observe(value),
        }
    }

    pub fn kind(&self) -> ExpositionKind {
        match self {
            Series::Gauge(_) => ExpositionKind::Gauge,
            Series::Histogram(_) => ExpositionKind::Histogram,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_buckets_are_exponential() {
        let buckets = histogram_buckets();
        assert_eq!(buckets.len(), 8);
        assert_eq!(buckets[0], 256.0);
        assert_eq!(buckets[1], 1024.0);
        assert_eq!(buckets[7], 256.0 * 16384.0);
    }

    #[test]
    fn test_summary_family_names_are_unique() {
        let mut names: Vec<&str> = SUMMARY_FAMILIES.iter().map(|(spec, _)| spec.name).collect();
        names.push(ERROR_FAMILY.name);
        names.push(LAST_SUMMARY_FAMILY.name);
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn test_gauge_update_replaces() {
        let registry = Registry::new();
        let identity = LabelIdentity::for_backup(&[], "r");
        let series =
            Series::register(&registry, &ERROR_FAMILY, ExpositionKind::Gauge, &identity).unwrap();
        series.update(3.0);
        series.update(1.0);
        let Series::Gauge(gauge) = &series else {
            panic!("expected gauge");
        };
        assert_eq!(gauge.get(), 1.0);
    }

    #[test]
    fn test_histogram_update_observes() {
        let registry = Registry::new();
        let identity = LabelIdentity::for_backup(&[], "r");
        let series =
            Series::register(&registry, &ERROR_FAMILY, ExpositionKind::Histogram, &identity)
                .unwrap();
        series.update(3.0);
        series.update(1.0);
        let Series::Histogram(histogram) = &series else {
            panic!("expected histogram");
        };
        assert_eq!(histogram.get_sample_count(), 2);
        assert_eq!(histogram.get_sample_sum(), 4.0);
        assert_eq!(series.kind(), ExpositionKind::Histogram);
    }

    #[test]
    fn test_register_twice_fails() {
        let registry = Registry::new();
        let identity = LabelIdentity::for_backup(&[], "r");
        Series::register(&registry, &ERROR_FAMILY, ExpositionKind::Gauge, &identity).unwrap();
        let err = Series::register(&registry, &ERROR_FAMILY, ExpositionKind::Gauge, &identity);
        assert!(matches!(err, Err(MetricsError::Prometheus(_))));
    }
}
