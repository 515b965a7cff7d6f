//! Label identity shared by every metric family of one run.

use super::MetricsError;

/// Name of the trailing repository label.
pub const REPO_LABEL: &str = "repo";

/// Ordered label names and values scoping all series of one run.
///
/// Built once before the collectors start; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelIdentity {
    names: Vec<String>,
    values: Vec<String>,
}

impl LabelIdentity {
    /// Creates an identity from explicit names and values.
    ///
    /// Returns `Err` when the two lists differ in length.
    pub fn new(names: Vec<String>, values: Vec<String>) -> Result<Self, MetricsError> {
        if names.len() != values.len() {
            return Err(MetricsError::Arity {
                names: names.len(),
                values: values.len(),
            });
        }
        Ok(Self { names, values })
    }

    /// Identity for a backup of `targets` into `repo`:
    /// `dir_0 .. dir_{n-1}` in command-line order, then `repo`.
    pub fn for_backup(targets: &[String], repo: &str) -> Self {
        let mut names: Vec<String> = (0..targets.len()).map(|i| format!("dir_{i}")).collect();
        names.push(REPO_LABEL.to_string());

        let mut values = targets.to_vec();
        values.push(repo.to_string());

        Self { names, values }
    }

    pub fn names(&self) -> Vec<&str> {
        self.names.iter().map(String::as_str).collect()
    }

    pub fn values(&self) -> Vec<&str> {
        self.values.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl std::fmt::Display for LabelIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pairs: Vec<String> = self
            .names
            .iter()
            .zip(&self.values)
            .map(|(n, v)| format!("{n}={v:?}"))
            .collect();
        write!(f, "{{{}}}", pairs.join(","))
    }
}
