//! Chroma vector store over its REST API
//!
//! Collections are resolved by name with `get_or_create` and their ids cached.
//! Chunks are embedded through an [`EmbeddingProvider`] and upserted by id.

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::VectorDbConfig;
use crate::error::{Error, Result};
use crate::types::Metadata;

use super::embedding::EmbeddingProvider;
use super::vector_store::{AddDocumentsRequest, AddDocumentsResponse, VectorStore};

#[derive(Serialize)]
struct CreateCollectionRequest<'a> {
    name: &'a str,
    get_or_create: bool,
}

#[derive(Deserialize)]
struct CollectionResponse {
    id: String,
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    ids: Vec<&'a str>,
    embeddings: Vec<Vec<f32>>,
    documents: Vec<&'a str>,
    metadatas: Vec<&'a Metadata>,
}

/// Chroma vector store provider
pub struct ChromaVectorStore {
    client: Client,
    base_url: String,
    embedder: Arc<dyn EmbeddingProvider>,
    collection_ids: DashMap<String, String>,
}

impl ChromaVectorStore {
    /// Create a new Chroma client
    pub fn new(config: &VectorDbConfig, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            embedder,
            collection_ids: DashMap::new(),
        })
    }

    async fn collection_id(&self, name: &str) -> Result<String> {
        if let Some(id) = self.collection_ids.get(name) {
            return Ok(id.value().clone());
        }

        let url = format!("{}/api/v1/collections", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&CreateCollectionRequest {
                name,
                get_or_create: true,
            })
            .send()
            .await
            .map_err(|e| Error::vector_db(format!("Collection request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::vector_db(format!(
                "Failed to get or create collection '{}': HTTP {} {}",
                name, status, body
            )));
        }

        let collection: CollectionResponse = response
            .json()
            .await
            .map_err(|e| Error::vector_db(format!("Invalid collection response: {}", e)))?;

        tracing::debug!("Resolved Chroma collection {} -> {}", name, collection.id);
        self.collection_ids
            .insert(name.to_string(), collection.id.clone());
        Ok(collection.id)
    }
}

#[async_trait]
impl VectorStore for ChromaVectorStore {
    async fn add_documents(&self, request: AddDocumentsRequest) -> Result<AddDocumentsResponse> {
        if request.documents.is_empty() {
            return Ok(AddDocumentsResponse::default());
        }

        let texts: Vec<String> = request
            .documents
            .iter()
            .map(|d| d.content.clone())
            .collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != texts.len() {
            return Err(Error::embedding(format!(
                "{} returned {} embeddings for {} chunks",
                self.embedder.name(),
                embeddings.len(),
                texts.len()
            )));
        }

        let collection_id = self.collection_id(&request.collection_name).await?;
        let upsert = UpsertRequest {
            ids: request.documents.iter().map(|d| d.id.as_str()).collect(),
            embeddings,
            documents: request.documents.iter().map(|d| d.content.as_str()).collect(),
            metadatas: request.documents.iter().map(|d| &d.metadata).collect(),
        };

        let url = format!("{}/api/v1/collections/{}/upsert", self.base_url, collection_id);
        let response = self
            .client
            .post(&url)
            .json(&upsert)
            .send()
            .await
            .map_err(|e| Error::vector_db(format!("Upsert request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::vector_db(format!(
                "Upsert into '{}' failed: HTTP {} {}",
                request.collection_name, status, body
            )));
        }

        Ok(AddDocumentsResponse {
            ids: request.documents.into_iter().map(|d| d.id).collect(),
        })
    }

    async fn count(&self, collection_name: &str) -> Result<usize> {
        let collection_id = self.collection_id(collection_name).await?;
        let url = format!("{}/api/v1/collections/{}/count", self.base_url, collection_id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::vector_db(format!("Count request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::vector_db(format!(
                "Count of '{}' failed: HTTP {}",
                collection_name,
                response.status()
            )));
        }

        response
            .json::<usize>()
            .await
            .map_err(|e| Error::vector_db(format!("Invalid count response: {}", e)))
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/v1/heartbeat", self.base_url);
        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &str {
        "chroma"
    }
}
