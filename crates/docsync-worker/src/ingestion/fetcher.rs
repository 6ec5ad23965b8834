//! Remote content fetch: one signed-URL request per batch, then bounded
//! concurrent downloads

use bytes::Bytes;
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::error::{Error, Result};
use crate::providers::{ObjectStorage, SignedUrl};

/// Fetches file contents through an [`ObjectStorage`]
#[derive(Clone)]
pub struct ContentFetcher {
    storage: Arc<dyn ObjectStorage>,
    expires_in: u64,
    max_in_flight: usize,
}

impl ContentFetcher {
    /// Create a fetcher; `max_in_flight` bounds concurrent downloads
    pub fn new(storage: Arc<dyn ObjectStorage>, expires_in: u64, max_in_flight: usize) -> Self {
        Self {
            storage,
            expires_in,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Signed URLs for all paths in one call.
    ///
    /// Fails when the storage call fails or returns a different number of
    /// entries than requested, since positions could no longer be trusted.
    pub async fn signed_urls(&self, paths: &[String], bucket: &str) -> Result<Vec<SignedUrl>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let urls = self
            .storage
            .signed_urls(paths, bucket, self.expires_in)
            .await?;

        if urls.len() != paths.len() {
            return Err(Error::storage(format!(
                "Requested {} signed URLs from bucket '{}' but got {}",
                paths.len(),
                bucket,
                urls.len()
            )));
        }

        Ok(urls)
    }

    /// Download each URL; a missing URL or failed download yields an error at
    /// its position without affecting the others
    pub async fn download_each(&self, urls: &[SignedUrl]) -> Vec<Result<Bytes>> {
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));

        let downloads = urls.iter().map(|signed| {
            let sem = semaphore.clone();
            let storage = self.storage.clone();

            async move {
                let url = match (&signed.signed_url, &signed.error) {
                    (Some(url), _) => url,
                    (None, Some(error)) => {
                        return Err(Error::storage(format!(
                            "No signed URL for '{}': {}",
                            signed.path, error
                        )))
                    }
                    (None, None) => {
                        return Err(Error::storage(format!(
                            "No signed URL for '{}'",
                            signed.path
                        )))
                    }
                };

                let _permit = sem
                    .acquire()
                    .await
                    .map_err(|_| Error::internal("download limiter closed"))?;

                let data = storage.download(url).await?;
                tracing::debug!("Downloaded {} ({} bytes)", signed.path, data.len());
                Ok(data)
            }
        });

        join_all(downloads).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MemoryObjectStorage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn paths(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    async fn fetch(fetcher: &ContentFetcher, names: &[&str]) -> Result<Vec<Result<Bytes>>> {
        let urls = fetcher.signed_urls(&paths(names), "docs").await?;
        Ok(fetcher.download_each(&urls).await)
    }

    #[tokio::test]
    async fn test_failure_in_the_middle_keeps_positions() {
        let storage = Arc::new(MemoryObjectStorage::new());
        storage.put("docs", "a.txt", "A");
        storage.put("docs", "b.txt", "B");
        storage.put("docs", "c.txt", "C");
        storage.fail_download("docs", "b.txt");

        let fetcher = ContentFetcher::new(storage, 3600, 2);
        let blobs = fetch(&fetcher, &["a.txt", "b.txt", "c.txt"]).await.unwrap();

        assert_eq!(blobs.len(), 3);
        assert_eq!(&blobs[0].as_ref().unwrap()[..], &b"A"[..]);
        assert!(blobs[1].is_err());
        assert_eq!(&blobs[2].as_ref().unwrap()[..], &b"C"[..]);
    }

    #[tokio::test]
    async fn test_missing_object_degrades_one_slot() {
        let storage = Arc::new(MemoryObjectStorage::new());
        storage.put("docs", "a.txt", "A");

        let fetcher = ContentFetcher::new(storage, 3600, 4);
        let blobs = fetch(&fetcher, &["missing.txt", "a.txt"]).await.unwrap();

        assert!(blobs[0].is_err());
        assert!(blobs[1].is_ok());
    }

    #[tokio::test]
    async fn test_signing_failure_fails_batch() {
        let storage = Arc::new(MemoryObjectStorage::new());
        storage.set_signing_error(Some("bucket not found"));

        let fetcher = ContentFetcher::new(storage, 3600, 4);
        let err = fetch(&fetcher, &["a.txt"]).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    /// Returns one URL fewer than requested
    struct ShortStorage;

    #[async_trait]
    impl ObjectStorage for ShortStorage {
        async fn signed_urls(&self, paths: &[String], _: &str, _: u64) -> Result<Vec<SignedUrl>> {
            Ok(paths
                .iter()
                .skip(1)
                .map(|p| SignedUrl {
                    path: p.clone(),
                    signed_url: Some(format!("memory://x/{}", p)),
                    error: None,
                })
                .collect())
        }

        async fn download(&self, _: &str) -> Result<Bytes> {
            Ok(Bytes::new())
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        fn name(&self) -> &str {
            "short"
        }
    }

    #[tokio::test]
    async fn test_url_count_mismatch_fails_batch() {
        let fetcher = ContentFetcher::new(Arc::new(ShortStorage), 3600, 4);
        let err = fetch(&fetcher, &["a", "b"]).await.unwrap_err();
        assert!(err.to_string().contains("got 1"));
    }

    /// Tracks the highest number of concurrent downloads
    #[derive(Default)]
    struct CountingStorage {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ObjectStorage for CountingStorage {
        async fn signed_urls(&self, paths: &[String], _: &str, _: u64) -> Result<Vec<SignedUrl>> {
            Ok(paths
                .iter()
                .map(|p| SignedUrl {
                    path: p.clone(),
                    signed_url: Some(p.clone()),
                    error: None,
                })
                .collect())
        }

        async fn download(&self, _: &str) -> Result<Bytes> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Bytes::from_static(b"x"))
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_downloads_are_bounded() {
        let storage = Arc::new(CountingStorage::default());
        let fetcher = ContentFetcher::new(storage.clone(), 3600, 2);
        let names = ["f0", "f1", "f2", "f3", "f4", "f5", "f6", "f7"];

        let blobs = fetch(&fetcher, &names).await.unwrap();
        assert!(blobs.iter().all(Result::is_ok));
        assert!(storage.peak.load(Ordering::SeqCst) <= 2);
        assert!(storage.peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let fetcher = ContentFetcher::new(Arc::new(MemoryObjectStorage::new()), 3600, 4);
        assert!(fetch(&fetcher, &[]).await.unwrap().is_empty());
    }
}
