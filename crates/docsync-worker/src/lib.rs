//! docsync-worker: background ingestion of uploaded files into a vector index
//!
//! A batch job names files in object storage. The worker filters them by
//! MIME type and extension, downloads them through signed URLs, extracts text
//! (PDF, DOCX, plain text), splits it into overlapping chunks, decorates each
//! chunk with provenance metadata and upserts the chunks into a vector
//! collection under deterministic ids.

pub mod config;
pub mod error;
pub mod ingestion;
pub mod processing;
pub mod providers;
pub mod server;
pub mod types;

pub use config::IngestConfig;
pub use error::{Error, Result};
pub use processing::{IngestPipeline, IngestWorker, JobQueue, MemoryJobQueue, WorkerConfig};
pub use types::{Chunk, FileSyncStatus, IngestionBatchJob, IngestionItem, Metadata, MetadataValue};
