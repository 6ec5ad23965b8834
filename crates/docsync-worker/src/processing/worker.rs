//! Queue consumer running batch jobs through the pipeline

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::job_queue::{Delivery, JobQueue, RetryPolicy};
use super::pipeline::IngestPipeline;
use crate::config::IngestConfig;
use crate::error::{Error, Result};

/// Worker settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue consumed, for logging
    pub queue_name: String,
    /// Name this worker registers under with the queue backend
    pub consumer_name: String,
    /// Jobs processed at once
    pub concurrency: usize,
    /// Deadline for one job; exceeding it fails the attempt
    pub job_timeout: Duration,
    /// Longest wait for a job before checking for shutdown again
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl WorkerConfig {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            queue_name: config.queue.queue_name.clone(),
            consumer_name: config
                .queue
                .consumer_name
                .clone()
                .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4().simple())),
            concurrency: config.processing.worker_concurrency().max(1),
            job_timeout: config.processing.job_timeout(),
            poll_interval: config.queue.poll_interval(),
            retry: RetryPolicy::from_config(&config.queue),
        }
    }
}

/// Consumes ingestion jobs from a queue
#[derive(Clone)]
pub struct IngestWorker {
    config: WorkerConfig,
    queue: Arc<dyn JobQueue>,
    pipeline: Arc<IngestPipeline>,
}

/// Running worker; dropping it also stops the worker
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stop taking jobs and wait for in-flight jobs to finish
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task.await?;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl IngestWorker {
    pub fn new(config: WorkerConfig, queue: Arc<dyn JobQueue>, pipeline: Arc<IngestPipeline>) -> Self {
        Self {
            config,
            queue,
            pipeline,
        }
    }

    /// Spawn the consume loop
    pub fn start(self) -> WorkerHandle {
        tracing::info!(
            "Worker {} consuming '{}' via {} queue into '{}': concurrency {}, {}s job timeout, {} attempts",
            self.config.consumer_name,
            self.config.queue_name,
            self.queue.name(),
            self.pipeline.collection_name(),
            self.config.concurrency,
            self.config.job_timeout.as_secs(),
            self.config.retry.max_attempts
        );

        let (shutdown, receiver) = watch::channel(false);
        let task = tokio::spawn(self.run(receiver));
        WorkerHandle { shutdown, task }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let concurrency = self.config.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Only take a job when a slot is free
            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            let next = tokio::select! {
                next = self.queue.next(self.config.poll_interval) => next,
                _ = shutdown.changed() => break,
            };

            match next {
                Ok(Some(delivery)) => {
                    let worker = self.clone();
                    tokio::spawn(async move {
                        worker.process(delivery).await;
                        drop(permit);
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("Error reading from {} queue: {}", self.queue.name(), e);
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        tracing::info!("Worker {} stopping, waiting for in-flight jobs", self.config.consumer_name);
        let _ = semaphore.acquire_many(concurrency as u32).await;
        tracing::info!("Worker {} stopped", self.config.consumer_name);
    }

    /// Run one delivery and settle it with the queue
    pub async fn process(&self, delivery: Delivery) {
        let job_id = delivery.job_id.clone();
        tracing::info!(
            "Processing job {} (attempt {}/{}, {} items)",
            job_id,
            delivery.attempt,
            self.config.retry.max_attempts,
            delivery.job.payloads.len()
        );
        let start = std::time::Instant::now();

        let result = match timeout(
            self.config.job_timeout,
            self.pipeline.handle_job(&job_id, &delivery.job),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "job {} exceeded {}ms",
                job_id,
                self.config.job_timeout.as_millis()
            ))),
        };

        match result {
            Ok(outcome) => {
                tracing::info!(
                    "Job {} completed in {:.1}s: {} chunks written",
                    job_id,
                    start.elapsed().as_secs_f64(),
                    outcome.counts.chunks_written
                );
                if let Err(e) = self.queue.ack(&delivery, outcome).await {
                    tracing::error!("Failed to acknowledge job {}: {}", job_id, e);
                }
            }
            Err(e) => {
                let message = e.to_string();
                let retry_after = self.config.retry.delay_for(delivery.attempt);

                match retry_after {
                    Some(delay) => tracing::warn!(
                        "Job {} failed on attempt {}, retrying in {}ms: {}",
                        job_id,
                        delivery.attempt,
                        delay.as_millis(),
                        message
                    ),
                    None => {
                        tracing::error!(
                            "Job {} failed after {} attempts: {}",
                            job_id,
                            delivery.attempt,
                            message
                        );
                        self.pipeline
                            .report_job_failure(&delivery.job, &message)
                            .await;
                    }
                }

                if let Err(e) = self.queue.fail(&delivery, &message, retry_after).await {
                    tracing::error!("Failed to record failure of job {}: {}", job_id, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::item::JobOutcome;
    use crate::processing::job_queue::{JobRecord, JobStatus, MemoryJobQueue};
    use crate::providers::{
        AddDocumentsRequest, AddDocumentsResponse, MemoryFileStatusStore, MemoryObjectStorage,
        MemoryVectorStore, VectorStore,
    };
    use crate::types::{FileSyncStatus, IngestionBatchJob, IngestionItem};
    use async_trait::async_trait;

    fn batch(file_ids: &[&str]) -> IngestionBatchJob {
        IngestionBatchJob {
            sync_id: "sync-w".to_string(),
            payloads: file_ids
                .iter()
                .map(|id| IngestionItem {
                    file_id: id.to_string(),
                    task_id: String::new(),
                    bucket_name: "docs".to_string(),
                    resource_path: format!("{}.txt", id),
                    content_type: "text/plain".to_string(),
                    original_file_name: format!("{}.txt", id),
                    metadata: Default::default(),
                })
                .collect(),
        }
    }

    fn worker_config(max_attempts: u32, base_backoff_ms: u64, job_timeout: Duration) -> WorkerConfig {
        WorkerConfig {
            queue_name: "test-queue".to_string(),
            consumer_name: "test-worker".to_string(),
            concurrency: 2,
            job_timeout,
            poll_interval: Duration::from_millis(20),
            retry: RetryPolicy {
                max_attempts,
                base_backoff: Duration::from_millis(base_backoff_ms),
                max_backoff: Duration::from_secs(1),
            },
        }
    }

    struct Setup {
        queue: Arc<MemoryJobQueue>,
        storage: Arc<MemoryObjectStorage>,
        statuses: Arc<MemoryFileStatusStore>,
        pipeline: Arc<IngestPipeline>,
    }

    fn setup(vectors: Arc<dyn VectorStore>, max_attempts: u32) -> Setup {
        let queue = Arc::new(MemoryJobQueue::new(max_attempts));
        let storage = Arc::new(MemoryObjectStorage::new());
        let statuses = Arc::new(MemoryFileStatusStore::new());
        let pipeline = Arc::new(
            IngestPipeline::new(
                &IngestConfig::default(),
                storage.clone(),
                vectors,
                statuses.clone(),
            )
            .unwrap(),
        );
        Setup {
            queue,
            storage,
            statuses,
            pipeline,
        }
    }

    async fn wait_for<F>(queue: &MemoryJobQueue, job_id: &str, done: F) -> JobRecord
    where
        F: Fn(&JobRecord) -> bool,
    {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(record) = queue.record(job_id).await.unwrap() {
                if done(&record) {
                    return record;
                }
            }
            assert!(
                std::time::Instant::now() < deadline,
                "job {} did not reach the expected state",
                job_id
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_worker_completes_job() {
        let vectors = Arc::new(MemoryVectorStore::new());
        let s = setup(vectors.clone(), 3);
        s.storage.put("docs", "a.txt", "alpha");
        s.storage.put("docs", "b.txt", "beta");

        let job_id = s.queue.enqueue(batch(&["a", "b"])).await.unwrap();
        let handle = IngestWorker::new(
            worker_config(3, 10, Duration::from_secs(5)),
            s.queue.clone(),
            s.pipeline.clone(),
        )
        .start();

        let record = wait_for(&s.queue, &job_id, |r| r.status == JobStatus::Completed).await;
        handle.stop().await.unwrap();

        assert_eq!(record.attempts, 1);
        let outcome: JobOutcome = record.outcome.unwrap();
        assert_eq!(outcome.counts.completed, 2);
        assert_eq!(vectors.ids(s.pipeline.collection_name()).len(), 2);
        assert_eq!(s.statuses.status("a"), Some(FileSyncStatus::SyncCompleted));
    }

    #[tokio::test]
    async fn test_write_failure_is_retried() {
        let vectors = Arc::new(MemoryVectorStore::new());
        vectors.fail_writes_for("a");
        let s = setup(vectors.clone(), 3);
        s.storage.put("docs", "a.txt", "alpha");

        let job_id = s.queue.enqueue(batch(&["a"])).await.unwrap();
        let handle = IngestWorker::new(
            worker_config(3, 200, Duration::from_secs(5)),
            s.queue.clone(),
            s.pipeline.clone(),
        )
        .start();

        let record = wait_for(&s.queue, &job_id, |r| r.status == JobStatus::Retrying).await;
        assert!(record.last_error.unwrap().contains("Vector database error"));
        vectors.clear_failure("a");

        let record = wait_for(&s.queue, &job_id, |r| r.status == JobStatus::Completed).await;
        handle.stop().await.unwrap();

        assert_eq!(record.attempts, 2);
        assert_eq!(vectors.documents_for_file(s.pipeline.collection_name(), "a").len(), 1);
    }

    #[tokio::test]
    async fn test_job_dead_after_max_attempts() {
        let vectors = Arc::new(MemoryVectorStore::new());
        vectors.fail_writes_for("a");
        let s = setup(vectors.clone(), 2);
        s.storage.put("docs", "a.txt", "alpha");

        let job_id = s.queue.enqueue(batch(&["a"])).await.unwrap();
        let handle = IngestWorker::new(
            worker_config(2, 10, Duration::from_secs(5)),
            s.queue.clone(),
            s.pipeline.clone(),
        )
        .start();

        let record = wait_for(&s.queue, &job_id, |r| r.status == JobStatus::Failed).await;
        handle.stop().await.unwrap();

        assert_eq!(record.attempts, 2);
        assert_eq!(vectors.add_calls(), 2);
        assert_eq!(s.statuses.status("a"), Some(FileSyncStatus::SyncFailed));
    }

    /// Vector store that never answers in time
    struct SlowVectorStore;

    #[async_trait]
    impl VectorStore for SlowVectorStore {
        async fn add_documents(&self, request: AddDocumentsRequest) -> Result<AddDocumentsResponse> {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(AddDocumentsResponse {
                ids: request.documents.into_iter().map(|d| d.id).collect(),
            })
        }

        async fn count(&self, _: &str) -> Result<usize> {
            Ok(0)
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_job_timeout_fails_attempt() {
        let s = setup(Arc::new(SlowVectorStore), 1);
        s.storage.put("docs", "a.txt", "alpha");

        let job_id = s.queue.enqueue(batch(&["a"])).await.unwrap();
        let handle = IngestWorker::new(
            worker_config(1, 10, Duration::from_millis(50)),
            s.queue.clone(),
            s.pipeline.clone(),
        )
        .start();

        let record = wait_for(&s.queue, &job_id, |r| r.status == JobStatus::Failed).await;
        handle.stop().await.unwrap();

        assert!(record.last_error.unwrap().contains("Timed out"));
        assert_eq!(s.statuses.status("a"), Some(FileSyncStatus::SyncFailed));
    }

    #[tokio::test]
    async fn test_stop_idle_worker() {
        let s = setup(Arc::new(MemoryVectorStore::new()), 3);
        let handle = IngestWorker::new(
            worker_config(3, 10, Duration::from_secs(5)),
            s.queue.clone(),
            s.pipeline.clone(),
        )
        .start();

        assert!(handle.is_running());
        tokio::time::timeout(Duration::from_secs(1), handle.stop())
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_config_from_ingest_config() {
        let mut config = IngestConfig::default();
        config.queue.consumer_name = Some("w-1".to_string());
        config.processing.worker_concurrency = Some(3);

        let worker = WorkerConfig::from_config(&config);
        assert_eq!(worker.consumer_name, "w-1");
        assert_eq!(worker.concurrency, 3);
        assert_eq!(worker.queue_name, "embed-queue");
        assert_eq!(worker.retry.max_attempts, 3);
        assert_eq!(worker.job_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_generated_consumer_names_are_unique() {
        let config = IngestConfig::default();
        let a = WorkerConfig::from_config(&config);
        let b = WorkerConfig::from_config(&config);
        assert!(a.consumer_name.starts_with("worker-"));
        assert_ne!(a.consumer_name, b.consumer_name);
    }
}
