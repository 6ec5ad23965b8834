//! Vector store provider trait for writing chunks to a collection

use async_trait::async_trait;
use dashmap::DashSet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};
use crate::ingestion::metadata::FILE_ID;
use crate::types::{Chunk, MetadataValue};

/// One write of a file's chunks
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddDocumentsRequest {
    /// Target collection
    pub collection_name: String,
    /// Chunks with ids and metadata
    pub documents: Vec<Chunk>,
}

/// Ids of the written chunks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddDocumentsResponse {
    pub ids: Vec<String>,
}

/// Trait for vector storage
///
/// Writes are upserts keyed by chunk id, so writing the same chunks twice
/// leaves one copy.
///
/// Implementations:
/// - `ChromaVectorStore`: Chroma REST API, embeddings from an `EmbeddingProvider`
/// - `MemoryVectorStore`: in-process
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Upsert the documents into the collection
    async fn add_documents(&self, request: AddDocumentsRequest) -> Result<AddDocumentsResponse>;

    /// Number of documents in the collection
    async fn count(&self, collection_name: &str) -> Result<usize>;

    /// Check if the provider is healthy
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}

/// In-process vector store with upsert semantics
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Chunk>>>,
    add_calls: AtomicUsize,
    failing_files: DashSet<String>,
}

impl MemoryVectorStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make writes containing chunks of `file_id` fail
    pub fn fail_writes_for(&self, file_id: &str) {
        self.failing_files.insert(file_id.to_string());
    }

    /// Stop failing writes for `file_id`
    pub fn clear_failure(&self, file_id: &str) {
        self.failing_files.remove(file_id);
    }

    /// Number of `add_documents` calls seen, failed ones included
    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    /// Sorted ids in a collection
    pub fn ids(&self, collection_name: &str) -> Vec<String> {
        self.collections
            .read()
            .get(collection_name)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Fetch one document
    pub fn get(&self, collection_name: &str, id: &str) -> Option<Chunk> {
        self.collections
            .read()
            .get(collection_name)
            .and_then(|docs| docs.get(id).cloned())
    }

    /// Documents of one source file, in id order
    pub fn documents_for_file(&self, collection_name: &str, file_id: &str) -> Vec<Chunk> {
        let wanted = MetadataValue::from(file_id);
        self.collections
            .read()
            .get(collection_name)
            .map(|docs| {
                docs.values()
                    .filter(|c| c.metadata.get(FILE_ID) == Some(&wanted))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn add_documents(&self, request: AddDocumentsRequest) -> Result<AddDocumentsResponse> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);

        let failing = request.documents.iter().find_map(|doc| match doc.metadata.get(FILE_ID) {
            Some(MetadataValue::String(id)) if self.failing_files.contains(id) => Some(id.clone()),
            _ => None,
        });
        if let Some(file_id) = failing {
            return Err(Error::vector_db(format!(
                "injected write failure for file {}",
                file_id
            )));
        }

        let ids: Vec<String> = request.documents.iter().map(|d| d.id.clone()).collect();
        let mut collections = self.collections.write();
        let collection = collections.entry(request.collection_name).or_default();
        for doc in request.documents {
            collection.insert(doc.id.clone(), doc);
        }

        Ok(AddDocumentsResponse { ids })
    }

    async fn count(&self, collection_name: &str) -> Result<usize> {
        Ok(self
            .collections
            .read()
            .get(collection_name)
            .map_or(0, BTreeMap::len))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
