//! Job queue, per-item pipeline state, batch pipeline and the consuming worker

mod item;
mod job_queue;
mod pipeline;
#[cfg(feature = "redis")]
mod redis_queue;
mod worker;

pub use item::{ItemReport, ItemSlot, ItemState, JobOutcome, OutcomeCounts};
pub use job_queue::{
    Delivery, JobQueue, JobRecord, JobStatus, MemoryJobQueue, QueueStats, RetryPolicy,
};
pub use pipeline::IngestPipeline;
#[cfg(feature = "redis")]
pub use redis_queue::RedisStreamQueue;
pub use worker::{IngestWorker, WorkerConfig, WorkerHandle};
