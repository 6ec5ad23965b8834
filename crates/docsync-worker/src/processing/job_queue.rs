//! Job queue for batch ingestion jobs with retry and job records
//!
//! The in-process queue serves a single worker process; the Redis Streams
//! backend (feature `redis`) lets several processes compete for jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use super::item::JobOutcome;
use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::types::IngestionBatchJob;

/// Job status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Active,
    /// Failed an attempt, waiting for the next one
    Retrying,
    Completed,
    /// Out of attempts
    Failed,
}

/// Introspection record kept for every enqueued job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub sync_id: String,
    pub status: JobStatus,
    /// Deliveries so far
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub total_items: usize,
    pub outcome: Option<JobOutcome>,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(id: String, job: &IngestionBatchJob, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id,
            sync_id: job.sync_id.clone(),
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts,
            last_error: None,
            total_items: job.payloads.len(),
            outcome: None,
            enqueued_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// A job handed to a worker
#[derive(Debug, Clone)]
pub struct Delivery {
    pub job_id: String,
    /// 1 on first delivery
    pub attempt: u32,
    pub job: IngestionBatchJob,
    /// Backend-specific handle (stream entry id for Redis)
    pub receipt: Option<String>,
}

/// Exponential backoff between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before retrying after `attempt` failed, or `None` when the job
    /// is out of attempts
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }

        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_backoff.saturating_mul(2u32.saturating_pow(exponent));
        Some(delay.min(self.max_backoff))
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total_jobs: usize,
    pub queued: usize,
    pub active: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueStats {
    /// Tally records by status
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a JobRecord>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.total_jobs += 1;
            match record.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Active => stats.active += 1,
                JobStatus::Retrying => stats.retrying += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

/// Trait for ingestion job queues
///
/// Delivery is at-least-once: a job that is neither acknowledged nor failed
/// may be delivered again.
///
/// Implementations:
/// - `MemoryJobQueue`: in-process
/// - `RedisStreamQueue`: Redis Streams consumer group (feature `redis`)
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Validate and enqueue a job, returning its id
    async fn enqueue(&self, job: IngestionBatchJob) -> Result<String>;

    /// Wait up to `wait` for the next job
    async fn next(&self, wait: Duration) -> Result<Option<Delivery>>;

    /// Mark a delivery as done
    async fn ack(&self, delivery: &Delivery, outcome: JobOutcome) -> Result<()>;

    /// Mark a delivery as failed; retried after `retry_after`, or dead when `None`
    async fn fail(
        &self,
        delivery: &Delivery,
        error: &str,
        retry_after: Option<Duration>,
    ) -> Result<()>;

    /// Job record by id
    async fn record(&self, job_id: &str) -> Result<Option<JobRecord>>;

    /// Counts by status
    async fn stats(&self) -> Result<QueueStats>;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// In-process job queue
///
/// Records of finished jobs are kept up to a retention limit; the oldest
/// are evicted first.
pub struct MemoryJobQueue {
    ready: Mutex<VecDeque<String>>,
    delayed: Mutex<Vec<(Instant, String)>>,
    jobs: DashMap<String, IngestionBatchJob>,
    records: DashMap<String, JobRecord>,
    /// Completed or dead job ids, oldest first
    finished: Mutex<VecDeque<String>>,
    notify: Notify,
    max_attempts: u32,
    retain_finished: usize,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default().max_attempts)
    }
}

impl MemoryJobQueue {
    /// `max_attempts` is stored on each job record
    pub fn new(max_attempts: u32) -> Self {
        Self {
            ready: Mutex::new(VecDeque::new()),
            delayed: Mutex::new(Vec::new()),
            jobs: DashMap::new(),
            records: DashMap::new(),
            finished: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            max_attempts: max_attempts.max(1),
            retain_finished: QueueConfig::default().retain_finished_jobs,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.max_attempts).with_retention(config.retain_finished_jobs)
    }

    /// Keep at most `retain` records of finished jobs
    pub fn with_retention(mut self, retain: usize) -> Self {
        self.retain_finished = retain;
        self
    }

    /// Jobs waiting for delivery, delayed retries included
    pub fn pending(&self) -> usize {
        let ready = self.ready.lock().len();
        ready + self.delayed.lock().len()
    }

    /// Move due retries to the ready queue; returns the next due time
    fn promote_due(&self) -> Option<Instant> {
        let now = Instant::now();
        let mut delayed = self.delayed.lock();
        let mut ready = self.ready.lock();

        delayed.retain(|(due, id)| {
            if *due <= now {
                ready.push_back(id.clone());
                false
            } else {
                true
            }
        });

        delayed.iter().map(|(due, _)| *due).min()
    }

    /// Remember a finished job and evict the oldest records past the limit
    fn retire(&self, job_id: &str) {
        self.jobs.remove(job_id);

        let evicted: Vec<String> = {
            let mut finished = self.finished.lock();
            finished.push_back(job_id.to_string());
            let excess = finished.len().saturating_sub(self.retain_finished);
            finished.drain(..excess).collect()
        };

        for id in evicted {
            self.records.remove(&id);
        }
    }

    fn take_ready(&self) -> Option<Delivery> {
        loop {
            let job_id = self.ready.lock().pop_front()?;

            let Some(job) = self.jobs.get(&job_id).map(|j| j.value().clone()) else {
                tracing::warn!("Dropping queue entry for unknown job {}", job_id);
                continue;
            };

            let attempt = match self.records.get_mut(&job_id) {
                Some(mut record) => {
                    record.attempts += 1;
                    record.touch(JobStatus::Active);
                    record.attempts
                }
                None => 1,
            };

            return Some(Delivery {
                job_id,
                attempt,
                job,
                receipt: None,
            });
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: IngestionBatchJob) -> Result<String> {
        job.validate()?;

        let job_id = Uuid::new_v4().to_string();
        self.records.insert(
            job_id.clone(),
            JobRecord::new(job_id.clone(), &job, self.max_attempts),
        );
        tracing::info!(
            "Enqueued job {} (sync {}, {} items)",
            job_id,
            job.sync_id,
            job.payloads.len()
        );
        self.jobs.insert(job_id.clone(), job);
        self.ready.lock().push_back(job_id.clone());
        self.notify.notify_one();

        Ok(job_id)
    }

    async fn next(&self, wait: Duration) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + wait;

        loop {
            let next_due = self.promote_due();
            if let Some(delivery) = self.take_ready() {
                return Ok(Some(delivery));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            let wake_at = next_due.map_or(deadline, |due| due.min(deadline));
            let _ = tokio::time::timeout_at(wake_at, self.notify.notified()).await;
        }
    }

    async fn ack(&self, delivery: &Delivery, outcome: JobOutcome) -> Result<()> {
        let mut record = self
            .records
            .get_mut(&delivery.job_id)
            .ok_or_else(|| Error::JobNotFound(delivery.job_id.clone()))?;

        record.outcome = Some(outcome);
        record.touch(JobStatus::Completed);
        drop(record);

        self.retire(&delivery.job_id);
        Ok(())
    }

    async fn fail(
        &self,
        delivery: &Delivery,
        error: &str,
        retry_after: Option<Duration>,
    ) -> Result<()> {
        let mut record = self
            .records
            .get_mut(&delivery.job_id)
            .ok_or_else(|| Error::JobNotFound(delivery.job_id.clone()))?;

        record.last_error = Some(error.to_string());

        match retry_after {
            Some(delay) => {
                record.touch(JobStatus::Retrying);
                drop(record);

                if delay.is_zero() {
                    self.ready.lock().push_back(delivery.job_id.clone());
                } else {
                    self.delayed
                        .lock()
                        .push((Instant::now() + delay, delivery.job_id.clone()));
                }
                self.notify.notify_one();
            }
            None => {
                record.touch(JobStatus::Failed);
                drop(record);
                self.retire(&delivery.job_id);
            }
        }

        Ok(())
    }

    async fn record(&self, job_id: &str) -> Result<Option<JobRecord>> {
        Ok(self.records.get(job_id).map(|r| r.value().clone()))
    }

    async fn stats(&self) -> Result<QueueStats> {
        let records: Vec<JobRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        Ok(QueueStats::from_records(&records))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
