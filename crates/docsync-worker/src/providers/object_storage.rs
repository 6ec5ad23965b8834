//! Object storage provider trait: signed URLs and downloads

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Signed URL for one requested path
///
/// The service may refuse individual paths (missing object, bad path); such
/// entries carry `error` and no URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    /// Path the URL was requested for
    pub path: String,
    /// Time-limited download URL
    pub signed_url: Option<String>,
    /// Per-path error reported by the service
    pub error: Option<String>,
}

/// Trait for the object storage holding uploaded files
///
/// Implementations:
/// - `SupabaseStorage`: Supabase Storage REST API
/// - `MemoryObjectStorage`: in-process, for tests and local runs
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Request signed download URLs for `paths`, in the same order
    async fn signed_urls(
        &self,
        paths: &[String],
        bucket: &str,
        expires_in: u64,
    ) -> Result<Vec<SignedUrl>>;

    /// Download the object behind a signed URL
    async fn download(&self, url: &str) -> Result<Bytes>;

    /// Check if the provider is healthy
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}

const MEMORY_SCHEME: &str = "memory://";

/// In-process object storage
///
/// Signed URLs have the form `memory://{bucket}/{path}`. Failures can be
/// injected per path (download) or for the whole signing call.
#[derive(Default)]
pub struct MemoryObjectStorage {
    objects: DashMap<String, Bytes>,
    failing_downloads: DashSet<String>,
    signing_error: RwLock<Option<String>>,
    sign_requests: Mutex<Vec<Vec<String>>>,
}

impl MemoryObjectStorage {
    /// Empty storage
    pub fn new() -> Self {
        Self::default()
    }

    fn key(bucket: &str, path: &str) -> String {
        format!("{}/{}", bucket, path)
    }

    /// Store an object
    pub fn put(&self, bucket: &str, path: &str, data: impl Into<Bytes>) {
        self.objects.insert(Self::key(bucket, path), data.into());
    }

    /// Make downloads of `bucket/path` fail
    pub fn fail_download(&self, bucket: &str, path: &str) {
        self.failing_downloads.insert(Self::key(bucket, path));
    }

    /// Make every `signed_urls` call fail with `message` (or succeed again with `None`)
    pub fn set_signing_error(&self, message: Option<&str>) {
        *self.signing_error.write() = message.map(String::from);
    }

    /// Paths of every `signed_urls` call, in call order
    pub fn sign_requests(&self) -> Vec<Vec<String>> {
        self.sign_requests.lock().clone()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn signed_urls(
        &self,
        paths: &[String],
        bucket: &str,
        _expires_in: u64,
    ) -> Result<Vec<SignedUrl>> {
        self.sign_requests.lock().push(paths.to_vec());
        let signing_error = self.signing_error.read().clone();
        if let Some(message) = signing_error {
            return Err(Error::storage(message));
        }

        Ok(paths
            .iter()
            .map(|path| {
                let key = Self::key(bucket, path);
                if self.objects.contains_key(&key) {
                    SignedUrl {
                        path: path.clone(),
                        signed_url: Some(format!("{}{}", MEMORY_SCHEME, key)),
                        error: None,
                    }
                } else {
                    SignedUrl {
                        path: path.clone(),
                        signed_url: None,
                        error: Some("Object not found".to_string()),
                    }
                }
            })
            .collect())
    }

    async fn download(&self, url: &str) -> Result<Bytes> {
        let key = url
            .strip_prefix(MEMORY_SCHEME)
            .ok_or_else(|| Error::fetch(url, "not a memory:// URL"))?;

        if self.failing_downloads.contains(key) {
            return Err(Error::fetch(url, "injected download failure"));
        }

        self.objects
            .get(key)
            .map(|data| data.value().clone())
            .ok_or_else(|| Error::fetch(url, "object not found"))
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
