//! Batch ingestion pipeline
//!
//! filter → signed URLs → download → load → split → decorate → write, with
//! every stage rewriting the per-item slots in place.

use chrono::Utc;
use futures_util::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::item::{ItemSlot, ItemState, JobOutcome};
use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::ingestion::{build_chunks, AllowList, ContentFetcher, FileParser, RecursiveSplitter};
use crate::providers::{AddDocumentsRequest, FileStatusStore, ObjectStorage, VectorStore};
use crate::types::{FileSyncStatus, IngestionBatchJob, SkipReason};

/// Runs one batch job end to end
pub struct IngestPipeline {
    allow_list: AllowList,
    fetcher: ContentFetcher,
    splitter: RecursiveSplitter,
    vector_store: Arc<dyn VectorStore>,
    status_store: Arc<dyn FileStatusStore>,
    collection_name: String,
    default_bucket: String,
    max_in_flight: usize,
}

impl IngestPipeline {
    /// Build the pipeline; fails on invalid chunking settings
    pub fn new(
        config: &IngestConfig,
        storage: Arc<dyn ObjectStorage>,
        vector_store: Arc<dyn VectorStore>,
        status_store: Arc<dyn FileStatusStore>,
    ) -> Result<Self> {
        let max_in_flight = config.processing.max_in_flight.max(1);

        Ok(Self {
            allow_list: AllowList::from_config(&config.filter),
            fetcher: ContentFetcher::new(
                storage,
                config.storage.signed_url_expires_in,
                max_in_flight,
            ),
            splitter: RecursiveSplitter::from_config(&config.chunking)?,
            vector_store,
            status_store,
            collection_name: config.vector.collection_name.clone(),
            default_bucket: config.storage.default_bucket.clone(),
            max_in_flight,
        })
    }

    /// Target collection
    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    /// Process a batch. Per-item fetch and load failures are recorded in the
    /// outcome; signed-URL and vector-write failures fail the job.
    pub async fn handle_job(&self, job_id: &str, job: &IngestionBatchJob) -> Result<JobOutcome> {
        tracing::info!(
            "Job {} (sync {}): {} items received",
            job_id,
            job.sync_id,
            job.payloads.len()
        );

        let mut slots = self.filter(job);
        self.report_initial(&slots).await;

        let eligible = slots
            .iter()
            .filter(|s| matches!(s.state, ItemState::Eligible { .. }))
            .count();
        tracing::info!(
            "Job {}: {} eligible, {} skipped by filter",
            job_id,
            eligible,
            slots.len() - eligible
        );

        if eligible > 0 {
            let bucket = job.batch_bucket(&self.default_bucket);
            self.fetch(&mut slots, bucket).await?;
            self.extract(&mut slots).await;
            self.split(&mut slots);
        }

        let write_errors = self.write(&mut slots).await;
        self.report_final(&slots).await;

        let outcome = JobOutcome::from_slots(&slots);
        tracing::info!(
            "Job {}: {} completed, {} skipped, {} failed, {} chunks written",
            job_id,
            outcome.counts.completed,
            outcome.counts.skipped,
            outcome.counts.failed,
            outcome.counts.chunks_written
        );

        match write_errors.first() {
            Some(first) => Err(Error::vector_db(format!(
                "{} of {} writes failed for job {}: {}",
                write_errors.len(),
                outcome.counts.completed + write_errors.len(),
                job_id,
                first
            ))),
            None => Ok(outcome),
        }
    }

    /// Mark the eligible items of a job that will not be retried as failed
    pub async fn report_job_failure(&self, job: &IngestionBatchJob, error: &str) {
        for item in &job.payloads {
            if self.allow_list.is_eligible(item) {
                self.set_status(&item.file_id, FileSyncStatus::SyncFailed, Some(error))
                    .await;
            }
        }
    }

    fn filter(&self, job: &IngestionBatchJob) -> Vec<ItemSlot> {
        job.payloads
            .iter()
            .map(|item| {
                let state = match self.allow_list.eligible_extension(item) {
                    Some(extension) => ItemState::Eligible { extension },
                    None => {
                        tracing::debug!(
                            "Skipping {} ({}, {})",
                            item.resource_path,
                            item.original_file_name,
                            item.content_type
                        );
                        ItemState::Skipped(SkipReason::Ineligible)
                    }
                };
                ItemSlot::new(item.clone(), state)
            })
            .collect()
    }

    /// One signed-URL call for the batch, then bounded downloads
    async fn fetch(&self, slots: &mut [ItemSlot], bucket: &str) -> Result<()> {
        let targets: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s.state, ItemState::Eligible { .. }))
            .map(|(index, _)| index)
            .collect();
        let paths: Vec<String> = targets
            .iter()
            .map(|&index| slots[index].item.resource_path.clone())
            .collect();

        let urls = self.fetcher.signed_urls(&paths, bucket).await?;
        let downloads = self.fetcher.download_each(&urls).await;

        for (index, result) in targets.into_iter().zip(downloads) {
            let slot = &mut slots[index];
            let ItemState::Eligible { extension } = &slot.state else {
                continue;
            };

            match result {
                Ok(data) => {
                    slot.state = ItemState::Fetched {
                        extension: extension.clone(),
                        data,
                    };
                }
                Err(e) => {
                    tracing::warn!("Fetch failed for {}: {}", slot.item.resource_path, e);
                    slot.fail(e.to_string());
                }
            }
        }

        Ok(())
    }

    /// Load text on the blocking pool
    async fn extract(&self, slots: &mut [ItemSlot]) {
        let inputs: Vec<_> = slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match &slot.state {
                ItemState::Fetched { extension, data } => Some((
                    index,
                    extension.clone(),
                    slot.item.original_file_name.clone(),
                    data.clone(),
                )),
                _ => None,
            })
            .collect();

        let results = bounded(self.max_in_flight, inputs, |(index, extension, name, data)| async move {
            (index, FileParser::parse_blocking(extension, name, data).await)
        })
        .await;

        for (index, result) in results {
            let slot = &mut slots[index];
            match result {
                Ok(doc) => {
                    tracing::debug!(
                        "Loaded {} ({} segments, {} chars)",
                        slot.item.resource_path,
                        doc.segments.len(),
                        doc.char_count()
                    );
                    slot.state = ItemState::Extracted {
                        segments: doc.segments,
                    };
                }
                Err(Error::UnsupportedFileType(what)) => {
                    tracing::warn!("No loader for {}: {}", slot.item.resource_path, what);
                    slot.skip(SkipReason::Unsupported);
                }
                Err(e) => {
                    tracing::warn!("Load failed for {}: {}", slot.item.resource_path, e);
                    slot.fail(e.to_string());
                }
            }
        }
    }

    fn split(&self, slots: &mut [ItemSlot]) {
        for slot in slots.iter_mut() {
            let ItemState::Extracted { segments } = &slot.state else {
                continue;
            };

            match self.splitter.split_segments(Some(segments.as_slice())) {
                Some(chunks) if !chunks.is_empty() => {
                    slot.state = ItemState::Chunked { chunks };
                }
                _ => slot.skip(SkipReason::EmptyContent),
            }
        }
    }

    /// One write per item with chunks; returns the write errors
    async fn write(&self, slots: &mut [ItemSlot]) -> Vec<String> {
        let requests: Vec<_> = slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match &slot.state {
                ItemState::Chunked { chunks } => Some((
                    index,
                    AddDocumentsRequest {
                        collection_name: self.collection_name.clone(),
                        documents: build_chunks(&slot.item, chunks.clone(), Utc::now()),
                    },
                )),
                _ => None,
            })
            .collect();

        let results = bounded(self.max_in_flight, requests, |(index, request)| {
            let store = self.vector_store.clone();
            async move {
                let count = request.documents.len();
                (index, store.add_documents(request).await.map(|_| count))
            }
        })
        .await;

        let mut errors = Vec::new();
        for (index, result) in results {
            let slot = &mut slots[index];
            match result {
                Ok(chunks_written) => {
                    tracing::debug!(
                        "Wrote {} chunks for {}",
                        chunks_written,
                        slot.item.resource_path
                    );
                    slot.state = ItemState::Written { chunks_written };
                }
                Err(e) => {
                    tracing::error!("Write failed for {}: {}", slot.item.resource_path, e);
                    errors.push(format!("{}: {}", slot.item.file_id, e));
                    slot.fail(e.to_string());
                }
            }
        }
        errors
    }

    async fn report_initial(&self, slots: &[ItemSlot]) {
        for slot in slots {
            match &slot.state {
                ItemState::Skipped(reason) => {
                    let reason = reason.to_string();
                    self.set_status(&slot.item.file_id, FileSyncStatus::SyncSkipped, Some(&reason))
                        .await;
                }
                _ => {
                    self.set_status(&slot.item.file_id, FileSyncStatus::SyncProcessing, None)
                        .await;
                }
            }
        }
    }

    async fn report_final(&self, slots: &[ItemSlot]) {
        for slot in slots {
            // Already reported by the filter
            if matches!(slot.state, ItemState::Skipped(SkipReason::Ineligible)) {
                continue;
            }
            let report = slot.report();
            self.set_status(&report.file_id, report.status, report.reason.as_deref())
                .await;
        }
    }

    async fn set_status(&self, file_id: &str, status: FileSyncStatus, detail: Option<&str>) {
        if let Err(e) = self.status_store.update_status(file_id, status, detail).await {
            tracing::warn!(
                "Status update {} for file {} via {} failed: {}",
                status,
                file_id,
                self.status_store.name(),
                e
            );
        }
    }
}

/// Run `f` over `inputs` with at most `limit` futures in flight
async fn bounded<T, F, Fut>(limit: usize, inputs: Vec<T>, f: F) -> Vec<Fut::Output>
where
    F: Fn(T) -> Fut,
    Fut: Future,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));

    let tasks = inputs.into_iter().map(|input| {
        let sem = semaphore.clone();
        let task = f(input);
        async move {
            let _permit = sem.acquire().await;
            task.await
        }
    });

    join_all(tasks).await
}
