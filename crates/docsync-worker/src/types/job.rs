//! Queue payloads: a batch of uploaded files to sync into the vector index

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Scalar metadata value attached by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::String(v) => f.write_str(v),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Ordered metadata map (stable key order keeps writes reproducible)
pub type Metadata = BTreeMap<String, MetadataValue>;

/// One uploaded file to sync
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionItem {
    /// Id of the file entity
    pub file_id: String,
    /// Upload task the file belongs to
    #[serde(default)]
    pub task_id: String,
    /// Bucket holding the object; may be empty
    #[serde(default)]
    pub bucket_name: String,
    /// Object path inside the bucket
    pub resource_path: String,
    /// MIME type reported at upload
    pub content_type: String,
    /// File name as uploaded, used for the extension
    pub original_file_name: String,
    /// Caller metadata copied onto every chunk
    #[serde(default)]
    pub metadata: Metadata,
}

/// A batch of files queued by one sync request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionBatchJob {
    /// Sync request id; carried for logging and the job record
    pub sync_id: String,
    /// Files in the batch, in request order
    pub payloads: Vec<IngestionItem>,
}

impl IngestionBatchJob {
    /// Queue job type name
    pub const JOB_NAME: &'static str = "embed-file";

    /// Check the job can be enqueued
    pub fn validate(&self) -> Result<()> {
        if self.payloads.is_empty() {
            return Err(Error::validation("payloads must contain at least one item"));
        }

        for (index, item) in self.payloads.iter().enumerate() {
            if item.file_id.trim().is_empty() {
                return Err(Error::validation(format!(
                    "payloads[{}].fileId must not be empty",
                    index
                )));
            }
            if item.resource_path.trim().is_empty() {
                return Err(Error::validation(format!(
                    "payloads[{}].resourcePath must not be empty",
                    index
                )));
            }
        }

        Ok(())
    }

    /// Bucket used for the whole batch: the first item's, else the default
    pub fn batch_bucket<'a>(&'a self, default_bucket: &'a str) -> &'a str {
        self.payloads
            .first()
            .map(|item| item.bucket_name.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or(default_bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(file_id: &str, bucket: &str) -> IngestionItem {
        IngestionItem {
            file_id: file_id.to_string(),
            task_id: "task-1".to_string(),
            bucket_name: bucket.to_string(),
            resource_path: format!("uploads/{}.txt", file_id),
            content_type: "text/plain".to_string(),
            original_file_name: format!("{}.txt", file_id),
            metadata: Metadata::new(),
        }
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let json = r#"{
            "syncId": "sync-1",
            "payloads": [{
                "fileId": "f1",
                "taskId": "t1",
                "bucketName": "docs",
                "resourcePath": "a/b.pdf",
                "contentType": "application/pdf",
                "originalFileName": "b.pdf",
                "metadata": {"owner": "alice", "version": 3, "draft": false, "score": 0.5}
            }]
        }"#;

        let job: IngestionBatchJob = serde_json::from_str(json).unwrap();
        assert_eq!(job.sync_id, "sync-1");
        let first = &job.payloads[0];
        assert_eq!(first.resource_path, "a/b.pdf");
        assert_eq!(first.metadata["owner"], MetadataValue::from("alice"));
        assert_eq!(first.metadata["version"], MetadataValue::Int(3));
        assert_eq!(first.metadata["draft"], MetadataValue::Bool(false));
        assert_eq!(first.metadata["score"], MetadataValue::Float(0.5));

        let back = serde_json::to_value(&job).unwrap();
        assert_eq!(back["payloads"][0]["originalFileName"], "b.pdf");
    }

    #[test]
    fn test_empty_payloads_rejected() {
        let job = IngestionBatchJob {
            sync_id: "s".to_string(),
            payloads: vec![],
        };
        assert!(matches!(job.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_missing_file_id_rejected() {
        let job = IngestionBatchJob {
            sync_id: "s".to_string(),
            payloads: vec![item("a", ""), item(" ", "")],
        };
        let err = job.validate().unwrap_err();
        assert!(err.to_string().contains("payloads[1]"));
    }

    #[test]
    fn test_batch_bucket_falls_back_to_default() {
        let job = IngestionBatchJob {
            sync_id: "s".to_string(),
            payloads: vec![item("a", ""), item("b", "other")],
        };
        assert_eq!(job.batch_bucket("rag-bucket"), "rag-bucket");

        let job = IngestionBatchJob {
            sync_id: "s".to_string(),
            payloads: vec![item("a", "docs"), item("b", "other")],
        };
        assert_eq!(job.batch_bucket("rag-bucket"), "docs");
    }
}
