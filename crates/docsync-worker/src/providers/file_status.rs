//! File status store: reports sync progress back to the file entity

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};
use crate::types::FileSyncStatus;

/// Trait for recording per-file sync status
///
/// Implementations:
/// - `TracingFileStatusStore`: logs transitions only
/// - `MemoryFileStatusStore`: keeps the latest status and full history
#[async_trait]
pub trait FileStatusStore: Send + Sync {
    /// Record a new status for a file
    async fn update_status(
        &self,
        file_id: &str,
        status: FileSyncStatus,
        detail: Option<&str>,
    ) -> Result<()>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}

/// Status store that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFileStatusStore;

#[async_trait]
impl FileStatusStore for TracingFileStatusStore {
    async fn update_status(
        &self,
        file_id: &str,
        status: FileSyncStatus,
        detail: Option<&str>,
    ) -> Result<()> {
        match detail {
            Some(detail) => tracing::info!("File {} -> {} ({})", file_id, status, detail),
            None => tracing::info!("File {} -> {}", file_id, status),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

/// One recorded transition
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub file_id: String,
    pub status: FileSyncStatus,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// In-memory status store
#[derive(Default)]
pub struct MemoryFileStatusStore {
    latest: DashMap<String, FileSyncStatus>,
    history: Mutex<Vec<StatusUpdate>>,
    failing: AtomicBool,
}

impl MemoryFileStatusStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest status of a file
    pub fn status(&self, file_id: &str) -> Option<FileSyncStatus> {
        self.latest.get(file_id).map(|s| *s.value())
    }

    /// Statuses recorded for one file, oldest first
    pub fn history_for(&self, file_id: &str) -> Vec<FileSyncStatus> {
        self.history
            .lock()
            .iter()
            .filter(|u| u.file_id == file_id)
            .map(|u| u.status)
            .collect()
    }

    /// Every recorded update, oldest first
    pub fn history(&self) -> Vec<StatusUpdate> {
        self.history.lock().clone()
    }

    /// Make every update fail (the worker must carry on regardless)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl FileStatusStore for MemoryFileStatusStore {
    async fn update_status(
        &self,
        file_id: &str,
        status: FileSyncStatus,
        detail: Option<&str>,
    ) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::internal("status store unavailable"));
        }

        self.latest.insert(file_id.to_string(), status);
        self.history.lock().push(StatusUpdate {
            file_id: file_id.to_string(),
            status,
            detail: detail.map(String::from),
            at: Utc::now(),
        });
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_tracks_history() {
        let store = MemoryFileStatusStore::new();
        store
            .update_status("f1", FileSyncStatus::SyncProcessing, None)
            .await
            .unwrap();
        store
            .update_status("f1", FileSyncStatus::SyncCompleted, Some("3 chunks"))
            .await
            .unwrap();

        assert_eq!(store.status("f1"), Some(FileSyncStatus::SyncCompleted));
        assert_eq!(
            store.history_for("f1"),
            vec![FileSyncStatus::SyncProcessing, FileSyncStatus::SyncCompleted]
        );
        assert_eq!(store.history()[1].detail.as_deref(), Some("3 chunks"));
        assert_eq!(store.status("other"), None);
    }

    #[tokio::test]
    async fn test_failing_store() {
        let store = MemoryFileStatusStore::new();
        store.set_failing(true);
        assert!(store
            .update_status("f1", FileSyncStatus::SyncFailed, None)
            .await
            .is_err());
        assert!(store.history().is_empty());
    }

    #[tokio::test]
    async fn test_tracing_store_never_fails() {
        let store = TracingFileStatusStore;
        assert!(store
            .update_status("f1", FileSyncStatus::SyncSkipped, Some("ineligible"))
            .await
            .is_ok());
    }
}
