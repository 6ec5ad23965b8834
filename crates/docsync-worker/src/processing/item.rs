//! Per-item pipeline state
//!
//! A batch is carried as one `Vec<ItemSlot>`. Every stage rewrites slot
//! states in place, so a failure for one item never moves another.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::{FileSyncStatus, IngestionItem, SkipReason};

/// Where an item is in the pipeline
#[derive(Debug, Clone)]
pub enum ItemState {
    /// Passed the allow-list filter
    Eligible { extension: String },
    /// Content downloaded
    Fetched { extension: String, data: Bytes },
    /// Text extracted, one segment per page or document
    Extracted { segments: Vec<String> },
    /// Split into chunk texts
    Chunked { chunks: Vec<String> },
    /// Chunks written to the vector store
    Written { chunks_written: usize },
    /// Left out on purpose
    Skipped(SkipReason),
    /// Fetch, load or write failed
    Failed(String),
}

/// One batch item and its state
#[derive(Debug, Clone)]
pub struct ItemSlot {
    pub item: IngestionItem,
    pub state: ItemState,
}

impl ItemSlot {
    pub fn new(item: IngestionItem, state: ItemState) -> Self {
        Self { item, state }
    }

    /// Move to `Failed` with a message
    pub fn fail(&mut self, message: impl Into<String>) {
        self.state = ItemState::Failed(message.into());
    }

    /// Move to `Skipped`
    pub fn skip(&mut self, reason: SkipReason) {
        self.state = ItemState::Skipped(reason);
    }

    /// File status matching the current state
    pub fn sync_status(&self) -> FileSyncStatus {
        match &self.state {
            ItemState::Written { .. } => FileSyncStatus::SyncCompleted,
            ItemState::Skipped(_) => FileSyncStatus::SyncSkipped,
            ItemState::Failed(_) => FileSyncStatus::SyncFailed,
            _ => FileSyncStatus::SyncProcessing,
        }
    }

    /// Summary for the job outcome
    pub fn report(&self) -> ItemReport {
        let (chunks_written, reason) = match &self.state {
            ItemState::Written { chunks_written } => (*chunks_written, None),
            ItemState::Skipped(reason) => (0, Some(reason.to_string())),
            ItemState::Failed(message) => (0, Some(message.clone())),
            _ => (0, None),
        };

        ItemReport {
            file_id: self.item.file_id.clone(),
            resource_path: self.item.resource_path.clone(),
            status: self.sync_status(),
            chunks_written,
            reason,
        }
    }
}

/// Final state of one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    pub file_id: String,
    pub resource_path: String,
    pub status: FileSyncStatus,
    pub chunks_written: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Item counts by outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub chunks_written: usize,
}

/// Result of running one batch job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    /// One report per payload item, in payload order
    pub items: Vec<ItemReport>,
    pub counts: OutcomeCounts,
}

impl JobOutcome {
    pub fn from_slots(slots: &[ItemSlot]) -> Self {
        let items: Vec<ItemReport> = slots.iter().map(ItemSlot::report).collect();

        let mut counts = OutcomeCounts::default();
        for report in &items {
            match report.status {
                FileSyncStatus::SyncCompleted => counts.completed += 1,
                FileSyncStatus::SyncSkipped => counts.skipped += 1,
                FileSyncStatus::SyncFailed => counts.failed += 1,
                _ => {}
            }
            counts.chunks_written += report.chunks_written;
        }

        Self { items, counts }
    }
}
