//! Sync status of file entities

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a file from upload to vector-index sync
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileSyncStatus {
    UploadQueued,
    UploadCompleted,
    SyncQueued,
    /// Worker picked the file up
    SyncProcessing,
    /// Chunks written to the vector index
    SyncCompleted,
    /// Fetch, load or write failed
    SyncFailed,
    /// Not eligible or nothing to index
    SyncSkipped,
}

impl FileSyncStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UploadQueued => "upload_queued",
            Self::UploadCompleted => "upload_completed",
            Self::SyncQueued => "sync_queued",
            Self::SyncProcessing => "sync_processing",
            Self::SyncCompleted => "sync_completed",
            Self::SyncFailed => "sync_failed",
            Self::SyncSkipped => "sync_skipped",
        }
    }

    /// No further transition is expected from the worker
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::SyncCompleted | Self::SyncFailed | Self::SyncSkipped
        )
    }
}

impl fmt::Display for FileSyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason why a file was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// MIME type or extension not on the allow-lists
    Ineligible,
    /// No loader for the file type
    Unsupported,
    /// File produced no chunks
    EmptyContent,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ineligible => f.write_str("file type not allowed for sync"),
            Self::Unsupported => f.write_str("no loader for this file type"),
            Self::EmptyContent => f.write_str("no text to index"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&FileSyncStatus::SyncProcessing).unwrap(),
            "\"sync_processing\""
        );
        assert_eq!(FileSyncStatus::SyncSkipped.to_string(), "sync_skipped");
        let parsed: FileSyncStatus = serde_json::from_str("\"upload_queued\"").unwrap();
        assert_eq!(parsed, FileSyncStatus::UploadQueued);
    }

    #[test]
    fn test_terminal_states() {
        assert!(FileSyncStatus::SyncCompleted.is_terminal());
        assert!(FileSyncStatus::SyncFailed.is_terminal());
        assert!(!FileSyncStatus::SyncProcessing.is_terminal());
        assert!(!FileSyncStatus::SyncQueued.is_terminal());
    }
}
