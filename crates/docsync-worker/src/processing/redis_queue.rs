//! Redis Streams job queue
//!
//! Jobs are stream entries `job_id, attempt, data` read through a consumer
//! group, so several worker processes can compete for them. Delayed retries
//! wait in a sorted set scored by due time and are re-added to the stream
//! when due. Job records live in a hash next to the stream.
//!
//! Each `next` call looks, in order, at: this consumer's own pending entries
//! (walked once after start), entries another consumer left unacknowledged
//! for longer than the claim idle time (`XAUTOCLAIM`, Redis 6.2+), and new
//! entries. Handled entries are acknowledged and deleted from the stream;
//! records of finished jobs are trimmed to the retention limit.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::item::JobOutcome;
use super::job_queue::{Delivery, JobQueue, JobRecord, JobStatus, QueueStats};
use crate::config::QueueConfig;
use crate::error::{Error, Result};
use crate::types::IngestionBatchJob;

/// Payload of a delayed retry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ParkedJob {
    job_id: String,
    attempt: u32,
    job: IngestionBatchJob,
}

/// One stream entry with its fields
#[derive(Debug, Clone, PartialEq)]
struct StreamEntry {
    id: String,
    fields: HashMap<String, Vec<u8>>,
}

impl StreamEntry {
    fn field(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }
}

/// Position in this consumer's pending entry list
///
/// Starts at `0` and follows the last replayed entry id, so every pending
/// entry is replayed once; `None` once the list is exhausted.
#[derive(Debug, Clone, PartialEq)]
struct PendingReplay {
    cursor: Option<String>,
}

impl PendingReplay {
    fn new() -> Self {
        Self {
            cursor: Some("0".to_string()),
        }
    }

    fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    fn advance(&mut self, replayed: Option<&StreamEntry>) {
        self.cursor = replayed.map(|entry| entry.id.clone());
    }
}

/// Job queue over a Redis stream and consumer group
pub struct RedisStreamQueue {
    conn: MultiplexedConnection,
    /// Blocking reads get their own connection so acks are not queued behind them
    read_conn: Mutex<MultiplexedConnection>,
    queue_name: String,
    group: String,
    consumer: String,
    max_attempts: u32,
    claim_idle: Duration,
    retain_finished: usize,
    pending: Mutex<PendingReplay>,
    /// `XAUTOCLAIM` scan position
    claim_cursor: Mutex<String>,
}

impl RedisStreamQueue {
    /// Connect as `consumer` and create the consumer group if missing.
    ///
    /// Entries left unacknowledged by any consumer for `claim_idle` are
    /// claimed and delivered again; it must exceed the job timeout.
    pub async fn connect(config: &QueueConfig, consumer: &str, claim_idle: Duration) -> Result<Self> {
        let client = redis::Client::open(config.redis_url())?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        let read_conn = client.get_multiplexed_async_connection().await?;

        let created: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&config.queue_name)
            .arg(&config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(_) => tracing::info!(
                "Created consumer group {} on {}",
                config.consumer_group,
                config.queue_name
            ),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                tracing::debug!("Consumer group {} already exists", config.consumer_group)
            }
            Err(e) => return Err(e.into()),
        }

        tracing::info!(
            "Redis queue ready: stream {}, group {}, consumer {}, claim after {:?}",
            config.queue_name,
            config.consumer_group,
            consumer,
            claim_idle
        );

        Ok(Self {
            conn,
            read_conn: Mutex::new(read_conn),
            queue_name: config.queue_name.clone(),
            group: config.consumer_group.clone(),
            consumer: consumer.to_string(),
            max_attempts: config.max_attempts.max(1),
            claim_idle,
            retain_finished: config.retain_finished_jobs,
            pending: Mutex::new(PendingReplay::new()),
            claim_cursor: Mutex::new("0-0".to_string()),
        })
    }

    fn records_key(&self) -> String {
        format!("{}:jobs", self.queue_name)
    }

    fn delayed_key(&self) -> String {
        format!("{}:delayed", self.queue_name)
    }

    fn finished_key(&self) -> String {
        format!("{}:finished", self.queue_name)
    }

    async fn add_entry(&self, job_id: &str, attempt: u32, job: &IngestionBatchJob) -> Result<String> {
        let data = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();
        let entry_id: String = redis::cmd("XADD")
            .arg(&self.queue_name)
            .arg("*")
            .arg("job_id")
            .arg(job_id)
            .arg("attempt")
            .arg(attempt)
            .arg("data")
            .arg(data)
            .query_async(&mut conn)
            .await?;
        Ok(entry_id)
    }

    /// Acknowledge an entry and drop it from the stream
    async fn ack_entry(&self, entry_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("XACK")
            .arg(&self.queue_name)
            .arg(&self.group)
            .arg(entry_id)
            .ignore()
            .cmd("XDEL")
            .arg(&self.queue_name)
            .arg(entry_id)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Note a finished job and drop the oldest finished records past the
    /// retention limit
    async fn retire(&self, job_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("ZADD")
            .arg(self.finished_key())
            .arg(Utc::now().timestamp_millis())
            .arg(job_id)
            .query_async(&mut conn)
            .await?;

        let stop = eviction_stop(self.retain_finished);
        let evicted: Vec<String> = redis::cmd("ZRANGE")
            .arg(self.finished_key())
            .arg(0)
            .arg(stop)
            .query_async(&mut conn)
            .await?;
        if evicted.is_empty() {
            return Ok(());
        }

        let _: () = redis::pipe()
            .atomic()
            .cmd("HDEL")
            .arg(self.records_key())
            .arg(&evicted)
            .ignore()
            .cmd("ZREM")
            .arg(self.finished_key())
            .arg(&evicted)
            .ignore()
            .query_async(&mut conn)
            .await?;
        tracing::debug!("Evicted {} finished job records", evicted.len());
        Ok(())
    }

    async fn load_record(&self, job_id: &str) -> Result<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("HGET")
            .arg(self.records_key())
            .arg(job_id)
            .query_async(&mut conn)
            .await?;

        raw.map(|json| serde_json::from_str(&json).map_err(Error::from))
            .transpose()
    }

    async fn save_record(&self, record: &JobRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("HSET")
            .arg(self.records_key())
            .arg(&record.id)
            .arg(json)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn update_record<F>(&self, job_id: &str, update: F) -> Result<()>
    where
        F: FnOnce(&mut JobRecord) + Send,
    {
        let mut record = self
            .load_record(job_id)
            .await?
            .ok_or_else(|| Error::JobNotFound(job_id.to_string()))?;
        update(&mut record);
        record.updated_at = Utc::now();
        self.save_record(&record).await
    }

    /// Re-add parked retries whose due time has passed
    async fn promote_due(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis();
        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.delayed_key())
            .arg("-inf")
            .arg(now)
            .query_async(&mut conn)
            .await?;

        for member in due {
            // Only the consumer that removes the member re-adds it
            let removed: i64 = redis::cmd("ZREM")
                .arg(self.delayed_key())
                .arg(&member)
                .query_async(&mut conn)
                .await?;
            if removed == 0 {
                continue;
            }

            match serde_json::from_str::<ParkedJob>(&member) {
                Ok(parked) => {
                    self.add_entry(&parked.job_id, parked.attempt, &parked.job)
                        .await?;
                    tracing::debug!(
                        "Retry of job {} (attempt {}) is due",
                        parked.job_id,
                        parked.attempt
                    );
                }
                Err(e) => tracing::warn!("Dropping unreadable delayed job: {}", e),
            }
        }

        Ok(())
    }

    async fn read_group(&self, start: &str, block: Option<Duration>) -> Result<Vec<StreamEntry>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(1);
        if let Some(block) = block {
            cmd.arg("BLOCK").arg(block.as_millis().max(1) as u64);
        }
        cmd.arg("STREAMS").arg(&self.queue_name).arg(start);

        let mut conn = self.read_conn.lock().await;
        let response: redis::Value = cmd.query_async(&mut *conn).await?;
        parse_stream_response(response)
    }

    /// Next entry from this consumer's pending list, if any are left
    async fn replay_pending(&self) -> Result<Option<StreamEntry>> {
        let mut pending = self.pending.lock().await;
        let Some(cursor) = pending.cursor().map(str::to_string) else {
            return Ok(None);
        };

        let entry = self.read_group(&cursor, None).await?.into_iter().next();
        pending.advance(entry.as_ref());
        if let Some(entry) = &entry {
            tracing::info!("Replaying pending entry {}", entry.id);
        }
        Ok(entry)
    }

    /// Claim one entry another consumer left idle past `claim_idle`
    async fn claim_idle_entry(&self) -> Result<Option<StreamEntry>> {
        let mut cursor = self.claim_cursor.lock().await;

        let mut conn = self.conn.clone();
        let response: redis::Value = redis::cmd("XAUTOCLAIM")
            .arg(&self.queue_name)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(self.claim_idle.as_millis() as u64)
            .arg(cursor.as_str())
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await?;

        let (next_cursor, entries) = parse_autoclaim_response(response)?;
        *cursor = next_cursor;

        let entry = entries.into_iter().next();
        if let Some(entry) = &entry {
            tracing::warn!(
                "Claimed entry {} left idle for over {:?} by another consumer",
                entry.id,
                self.claim_idle
            );
        }
        Ok(entry)
    }

    async fn to_delivery(&self, entry: StreamEntry) -> Result<Option<Delivery>> {
        let job_id = entry.field("job_id");
        let job = entry
            .fields
            .get("data")
            .map(|data| serde_json::from_slice::<IngestionBatchJob>(data));

        let (job_id, job) = match (job_id, job) {
            (Some(job_id), Some(Ok(job))) => (job_id, job),
            (_, Some(Err(e))) => {
                tracing::warn!("Acknowledging unreadable entry {}: {}", entry.id, e);
                self.ack_entry(&entry.id).await?;
                return Ok(None);
            }
            _ => {
                tracing::warn!("Acknowledging entry {} without job fields", entry.id);
                self.ack_entry(&entry.id).await?;
                return Ok(None);
            }
        };

        let attempt = entry
            .field("attempt")
            .and_then(|a| a.parse::<u32>().ok())
            .unwrap_or(1);

        if let Err(e) = self
            .update_record(&job_id, |record| {
                record.status = JobStatus::Active;
                record.attempts = attempt;
            })
            .await
        {
            tracing::warn!("No record update for job {}: {}", job_id, e);
        }

        Ok(Some(Delivery {
            job_id,
            attempt,
            job,
            receipt: Some(entry.id),
        }))
    }
}

#[async_trait]
impl JobQueue for RedisStreamQueue {
    async fn enqueue(&self, job: IngestionBatchJob) -> Result<String> {
        job.validate()?;

        let job_id = Uuid::new_v4().to_string();
        self.save_record(&JobRecord::new(job_id.clone(), &job, self.max_attempts))
            .await?;
        let entry_id = self.add_entry(&job_id, 1, &job).await?;

        tracing::info!(
            "Enqueued job {} as {} (sync {}, {} items)",
            job_id,
            entry_id,
            job.sync_id,
            job.payloads.len()
        );
        Ok(job_id)
    }

    async fn next(&self, wait: Duration) -> Result<Option<Delivery>> {
        self.promote_due().await?;

        // Entries delivered to this consumer before a restart come first
        if let Some(entry) = self.replay_pending().await? {
            return self.to_delivery(entry).await;
        }
        if let Some(entry) = self.claim_idle_entry().await? {
            return self.to_delivery(entry).await;
        }

        match self.read_group(">", Some(wait)).await?.into_iter().next() {
            Some(entry) => self.to_delivery(entry).await,
            None => Ok(None),
        }
    }

    async fn ack(&self, delivery: &Delivery, outcome: JobOutcome) -> Result<()> {
        self.update_record(&delivery.job_id, |record| {
            record.status = JobStatus::Completed;
            record.outcome = Some(outcome);
        })
        .await?;

        if let Some(entry_id) = &delivery.receipt {
            self.ack_entry(entry_id).await?;
        }
        self.retire(&delivery.job_id).await
    }

    async fn fail(
        &self,
        delivery: &Delivery,
        error: &str,
        retry_after: Option<Duration>,
    ) -> Result<()> {
        let status = match retry_after {
            Some(_) => JobStatus::Retrying,
            None => JobStatus::Failed,
        };
        self.update_record(&delivery.job_id, |record| {
            record.status = status;
            record.last_error = Some(error.to_string());
        })
        .await?;

        // Park the retry before acknowledging the old entry
        if let Some(delay) = retry_after {
            let parked = serde_json::to_string(&ParkedJob {
                job_id: delivery.job_id.clone(),
                attempt: delivery.attempt + 1,
                job: delivery.job.clone(),
            })?;
            let due = Utc::now().timestamp_millis() + delay.as_millis() as i64;

            let mut conn = self.conn.clone();
            let _: i64 = redis::cmd("ZADD")
                .arg(self.delayed_key())
                .arg(due)
                .arg(parked)
                .query_async(&mut conn)
                .await?;
        }

        if let Some(entry_id) = &delivery.receipt {
            self.ack_entry(entry_id).await?;
        }
        if retry_after.is_none() {
            self.retire(&delivery.job_id).await?;
        }
        Ok(())
    }

    async fn record(&self, job_id: &str) -> Result<Option<JobRecord>> {
        self.load_record(job_id).await
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = redis::cmd("HVALS")
            .arg(self.records_key())
            .query_async(&mut conn)
            .await?;

        let records: Vec<JobRecord> = raw
            .iter()
            .filter_map(|json| serde_json::from_str(json).ok())
            .collect();
        Ok(QueueStats::from_records(&records))
    }

    fn name(&self) -> &str {
        "redis"
    }
}

/// Parse an XREADGROUP reply: `[[stream, [[id, [field, value, ...]], ...]], ...]`
fn parse_stream_response(response: redis::Value) -> Result<Vec<StreamEntry>> {
    let streams = match response {
        redis::Value::Array(streams) => streams,
        redis::Value::Nil => return Ok(Vec::new()),
        other => {
            return Err(Error::queue(format!(
                "Unexpected XREADGROUP reply: {:?}",
                other
            )))
        }
    };

    let mut entries = Vec::new();

    for stream in streams {
        let redis::Value::Array(stream_data) = stream else {
            continue;
        };
        if let Some(redis::Value::Array(messages)) = stream_data.get(1) {
            entries.extend(parse_messages(messages));
        }
    }

    Ok(entries)
}

/// Parse an XAUTOCLAIM reply: `[next-cursor, [[id, [field, value, ...]], ...], deleted?]`
fn parse_autoclaim_response(response: redis::Value) -> Result<(String, Vec<StreamEntry>)> {
    let parts = match response {
        redis::Value::Array(parts) => parts,
        other => {
            return Err(Error::queue(format!(
                "Unexpected XAUTOCLAIM reply: {:?}",
                other
            )))
        }
    };

    let cursor = match parts.first() {
        Some(redis::Value::BulkString(id)) => String::from_utf8_lossy(id).into_owned(),
        Some(redis::Value::SimpleString(id)) => id.clone(),
        _ => return Err(Error::queue("XAUTOCLAIM reply has no cursor")),
    };
    let entries = match parts.get(1) {
        Some(redis::Value::Array(messages)) => parse_messages(messages),
        _ => Vec::new(),
    };

    Ok((cursor, entries))
}

/// Parse stream messages `[[id, [field, value, ...]], ...]`
fn parse_messages(messages: &[redis::Value]) -> Vec<StreamEntry> {
    let mut entries = Vec::new();

    for message in messages {
        let redis::Value::Array(msg_data) = message else {
            continue;
        };
        let Some(redis::Value::BulkString(id)) = msg_data.first() else {
            continue;
        };

        let mut fields = HashMap::new();
        // Pending entries that were deleted come back with a nil field list
        if let Some(redis::Value::Array(raw_fields)) = msg_data.get(1) {
            let mut iter = raw_fields.iter();
            while let (Some(key), Some(val)) = (iter.next(), iter.next()) {
                if let (redis::Value::BulkString(k), redis::Value::BulkString(v)) = (key, val) {
                    fields.insert(String::from_utf8_lossy(k).into_owned(), v.clone());
                }
            }
        }

        entries.push(StreamEntry {
            id: String::from_utf8_lossy(id).into_owned(),
            fields,
        });
    }

    entries
}

/// ZRANGE stop index selecting every finished job past the newest `retain`
fn eviction_stop(retain: usize) -> i64 {
    -(retain as i64) - 1
}
