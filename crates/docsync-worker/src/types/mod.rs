//! Core types for the ingestion worker

pub mod document;
pub mod file_status;
pub mod job;

pub use document::{Chunk, FileType};
pub use file_status::{FileSyncStatus, SkipReason};
pub use job::{IngestionBatchJob, IngestionItem, Metadata, MetadataValue};
