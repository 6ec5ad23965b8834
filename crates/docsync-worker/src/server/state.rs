//! Shared state for the producer/admin HTTP surface

use std::sync::Arc;

use crate::processing::JobQueue;
use crate::providers::{ObjectStorage, VectorStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Queue jobs are enqueued to
    queue: Arc<dyn JobQueue>,
    /// Checked by the readiness probe
    storage: Arc<dyn ObjectStorage>,
    /// Checked by the readiness probe
    vector_store: Arc<dyn VectorStore>,
}

impl AppState {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        storage: Arc<dyn ObjectStorage>,
        vector_store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                queue,
                storage,
                vector_store,
            }),
        }
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.inner.queue
    }

    /// True when object storage and the vector store answer their health checks
    pub async fn is_ready(&self) -> bool {
        let storage = match self.inner.storage.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                tracing::warn!("{} health check failed: {}", self.inner.storage.name(), e);
                false
            }
        };
        let vectors = match self.inner.vector_store.health_check().await {
            Ok(healthy) => healthy,
            Err(e) => {
                tracing::warn!("{} health check failed: {}", self.inner.vector_store.name(), e);
                false
            }
        };
        storage && vectors
    }
}
