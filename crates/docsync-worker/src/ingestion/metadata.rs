//! Chunk metadata decoration and deterministic chunk ids

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::types::{Chunk, IngestionItem, Metadata, MetadataValue};

/// Metadata key for the object path
pub const SOURCE_PATH: &str = "sourcePath";
/// Metadata key for the bucket
pub const BUCKET_NAME: &str = "bucketName";
/// Metadata key for the file id
pub const FILE_ID: &str = "fileId";
/// Metadata key for the MIME type
pub const CONTENT_TYPE: &str = "contentType";
/// Metadata key for the write timestamp
pub const CREATED_AT: &str = "createdAt";

/// Stable id for the `index`-th chunk of a file: hex SHA-256 of
/// `"{file_id}:{index}"`. Re-ingesting the same file yields the same ids.
pub fn chunk_id(file_id: &str, index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_id.as_bytes());
    hasher.update(b":");
    hasher.update(index.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Caller metadata plus provenance fields. Provenance wins on key clashes.
pub fn decorate(item: &IngestionItem, created_at: DateTime<Utc>) -> Metadata {
    let mut metadata = item.metadata.clone();
    metadata.insert(
        SOURCE_PATH.to_string(),
        MetadataValue::from(item.resource_path.as_str()),
    );
    metadata.insert(
        BUCKET_NAME.to_string(),
        MetadataValue::from(item.bucket_name.as_str()),
    );
    metadata.insert(FILE_ID.to_string(), MetadataValue::from(item.file_id.as_str()));
    metadata.insert(
        CONTENT_TYPE.to_string(),
        MetadataValue::from(item.content_type.as_str()),
    );
    metadata.insert(
        CREATED_AT.to_string(),
        MetadataValue::String(created_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    metadata
}

/// Turn split text into chunks sharing one decorated metadata map
pub fn build_chunks(item: &IngestionItem, texts: Vec<String>, created_at: DateTime<Utc>) -> Vec<Chunk> {
    let metadata = decorate(item, created_at);
    texts
        .into_iter()
        .enumerate()
        .map(|(index, content)| Chunk {
            id: chunk_id(&item.file_id, index),
            content,
            metadata: metadata.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item() -> IngestionItem {
        let mut metadata = Metadata::new();
        metadata.insert("owner".to_string(), MetadataValue::from("alice"));
        metadata.insert("fileId".to_string(), MetadataValue::from("spoofed"));
        metadata.insert("version".to_string(), MetadataValue::Int(2));

        IngestionItem {
            file_id: "file-1".to_string(),
            task_id: "task-1".to_string(),
            bucket_name: "docs".to_string(),
            resource_path: "team/report.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            original_file_name: "report.pdf".to_string(),
            metadata,
        }
    }

    #[test]
    fn test_chunk_id_is_stable() {
        assert_eq!(chunk_id("file-1", 0), chunk_id("file-1", 0));
        assert_ne!(chunk_id("file-1", 0), chunk_id("file-1", 1));
        assert_ne!(chunk_id("file-1", 0), chunk_id("file-2", 0));
        assert_eq!(chunk_id("a", 0), hex::encode(Sha256::digest(b"a:0")));
        assert_eq!(chunk_id("a", 0).len(), 64);
        assert!(chunk_id("a", 0).chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_decorate_overrides_caller_keys() {
        let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let metadata = decorate(&item(), created_at);

        assert_eq!(metadata["owner"], MetadataValue::from("alice"));
        assert_eq!(metadata["version"], MetadataValue::Int(2));
        assert_eq!(metadata[FILE_ID], MetadataValue::from("file-1"));
        assert_eq!(metadata[SOURCE_PATH], MetadataValue::from("team/report.pdf"));
        assert_eq!(metadata[BUCKET_NAME], MetadataValue::from("docs"));
        assert_eq!(metadata[CONTENT_TYPE], MetadataValue::from("application/pdf"));
        assert_eq!(
            metadata[CREATED_AT],
            MetadataValue::from("2024-05-01T12:30:00.000Z")
        );
    }

    #[test]
    fn test_build_chunks() {
        let created_at = Utc::now();
        let chunks = build_chunks(
            &item(),
            vec!["one".to_string(), "two".to_string()],
            created_at,
        );

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, chunk_id("file-1", 0));
        assert_eq!(chunks[1].id, chunk_id("file-1", 1));
        assert_eq!(chunks[1].content, "two");
        assert_eq!(chunks[0].metadata, chunks[1].metadata);
    }
}
