//! restic `--json` message schema.
//!
//! restic writes one JSON object per line. Every object carries a
//! `message_type` discriminator; only the kinds below are understood; any
//! other line is treated as opaque text.

pub mod classify;

use serde::Deserialize;

pub use classify::{Line, classify};

/// A structured restic message.
///
/// Decoded as an internally tagged enum on `message_type`, so unknown fields
/// are ignored and unknown kinds fail to decode.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "message_type")]
pub enum Event {
    #[serde(rename = "summary")]
    Summary(SummaryEvent),
    #[serde(rename = "status")]
    Status(StatusEvent),
    #[serde(rename = "error")]
    Error(ErrorEvent),
}

/// Periodic progress message. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StatusEvent {
    pub percent_done: f64,
    pub total_files: u64,
    pub files_done: u64,
    pub total_bytes: u64,
    pub bytes_done: u64,
    pub error_count: u64,
    pub current_files: Vec<String>,
}

/// Final counts emitted once at the end of a backup run.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SummaryEvent {
    pub files_new: u64,
    pub files_changed: u64,
    pub files_unmodified: u64,
    pub dirs_new: u64,
    pub dirs_changed: u64,
    pub dirs_unmodified: u64,
    pub data_blobs: u64,
    pub tree_blobs: u64,
    pub data_added: u64,
    pub total_files_processed: u64,
    pub total_bytes_processed: u64,
    /// Wall time of the backup in seconds.
    pub total_duration: f64,
    /// Absent on `--dry-run`.
    pub snapshot_id: Option<String>,
}

/// One failed filesystem operation reported on stderr.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ErrorEvent {
    pub error: ErrorDetail,
    pub during: String,
    pub item: String,
}

/// Inner `error` object.
///
/// Older restic releases serialize the Go `*os.PathError` (`Op`, `Path`,
/// `Err`); newer ones only send `message`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ErrorDetail {
    #[serde(rename = "Op")]
    pub op: Option<String>,
    #[serde(rename = "Path")]
    pub path: Option<String>,
    #[serde(rename = "Err")]
    pub errno: Option<i64>,
    pub message: Option<String>,
}

impl ErrorEvent {
    /// Short human description used in debug logs.
    pub fn describe(&self) -> String {
        if let Some(message) = &self.error.message {
            return format!("{} ({}): {}", self.item, self.during, message);
        }
        format!(
            "{} {} during {}: errno {}",
            self.error.op.as_deref().unwrap_or("?"),
            self.error.path.as_deref().unwrap_or(&self.item),
            self.during,
            self.error.errno.unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_describe_prefers_message() {
        let event = ErrorEvent {
            error: ErrorDetail {
                message: Some("permission denied".to_string()),
                ..ErrorDetail::default()
            },
            during: "archival".to_string(),
            item: "/etc/shadow".to_string(),
        };
        assert_eq!(event.describe(), "/etc/shadow (archival): permission denied");
    }

    #[test]
    fn test_error_describe_path_error() {
        let event = ErrorEvent {
            error: ErrorDetail {
                op: Some("open".to_string()),
                path: Some("/root/secret".to_string()),
                errno: Some(13),
                message: None,
            },
            during: "archival".to_string(),
            item: "/root/secret".to_string(),
        };
        assert_eq!(
            event.describe(),
            "open /root/secret during archival: errno 13"
        );
    }
}
