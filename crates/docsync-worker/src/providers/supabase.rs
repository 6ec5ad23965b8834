//! Supabase Storage client
//!
//! Signed URLs come from `POST {url}/storage/v1/object/sign/{bucket}`, which
//! returns one entry per requested path with either a relative `signedURL` or
//! an `error`. Downloads are plain GETs of the signed URL.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::config::StorageConfig;
use crate::error::{Error, Result};

use super::object_storage::{ObjectStorage, SignedUrl};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest<'a> {
    expires_in: u64,
    paths: &'a [String],
}

#[derive(Debug, Deserialize)]
struct SignResponseItem {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(rename = "signedURL", default)]
    signed_url: Option<String>,
}

/// Supabase Storage provider
pub struct SupabaseStorage {
    client: Client,
    storage_url: String,
    key: String,
}

impl SupabaseStorage {
    /// Create a client from storage configuration
    pub fn new(config: &StorageConfig) -> Result<Self> {
        if config.supabase_url.is_empty() {
            return Err(Error::config("SUPABASE_URL is not set"));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            storage_url: format!("{}/storage/v1", config.supabase_url.trim_end_matches('/')),
            key: config.supabase_key.clone(),
        })
    }

    /// Line response entries up with the requested paths by their `path`
    /// field; entries without one fill the remaining positions in order
    fn to_signed_urls(&self, requested: &[String], items: Vec<SignResponseItem>) -> Result<Vec<SignedUrl>> {
        if items.len() != requested.len() {
            return Err(Error::storage(format!(
                "Requested {} signed URLs but the response has {} entries",
                requested.len(),
                items.len()
            )));
        }

        let mut by_path: HashMap<String, VecDeque<SignResponseItem>> = HashMap::new();
        let mut unnamed = VecDeque::new();
        for item in items {
            match item.path.clone() {
                Some(path) => by_path.entry(path).or_default().push_back(item),
                None => unnamed.push_back(item),
            }
        }

        Ok(requested
            .iter()
            .map(|path| {
                let item = by_path
                    .get_mut(path)
                    .and_then(VecDeque::pop_front)
                    .or_else(|| unnamed.pop_front());

                match item {
                    Some(item) => SignedUrl {
                        path: path.clone(),
                        signed_url: item
                            .signed_url
                            .map(|relative| format!("{}{}", self.storage_url, relative)),
                        error: item.error,
                    },
                    None => SignedUrl {
                        path: path.clone(),
                        signed_url: None,
                        error: Some("path missing from signed URL response".to_string()),
                    },
                }
            })
            .collect())
    }
}

#[async_trait]
impl ObjectStorage for SupabaseStorage {
    async fn signed_urls(
        &self,
        paths: &[String],
        bucket: &str,
        expires_in: u64,
    ) -> Result<Vec<SignedUrl>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/object/sign/{}", self.storage_url, bucket);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.key)
            .header("apikey", &self.key)
            .json(&SignRequest { expires_in, paths })
            .send()
            .await
            .map_err(|e| Error::storage(format!("Signed URL request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::storage(format!(
                "Signed URL request for bucket '{}' failed: HTTP {} {}",
                bucket, status, body
            )));
        }

        let items: Vec<SignResponseItem> = response
            .json()
            .await
            .map_err(|e| Error::storage(format!("Invalid signed URL response: {}", e)))?;

        self.to_signed_urls(paths, items)
    }

    async fn download(&self, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::fetch(url, e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::fetch(url, format!("HTTP {}", response.status())));
        }

        response
            .bytes()
            .await
            .map_err(|e| Error::fetch(url, e.to_string()))
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/bucket", self.storage_url);
        match self
            .client
            .get(&url)
            .bearer_auth(&self.key)
            .header("apikey", &self.key)
            .send()
            .await
        {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    fn name(&self) -> &str {
        "supabase"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> SupabaseStorage {
        SupabaseStorage::new(&StorageConfig {
            supabase_url: "https://project.supabase.co/".to_string(),
            supabase_key: "service-key".to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_requires_url() {
        assert!(matches!(
            SupabaseStorage::new(&StorageConfig::default()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_sign_request_body() {
        let paths = vec!["a/b.pdf".to_string()];
        let body = serde_json::to_value(SignRequest {
            expires_in: 3600,
            paths: &paths,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"expiresIn": 3600, "paths": ["a/b.pdf"]}));
    }

    #[test]
    fn test_response_mapping() {
        let raw = r#"[
            {"error": null, "path": "a/b.pdf", "signedURL": "/object/sign/docs/a/b.pdf?token=t1"},
            {"error": "Either the object does not exist or you do not have access to it", "path": "a/c.pdf", "signedURL": null}
        ]"#;
        let items: Vec<SignResponseItem> = serde_json::from_str(raw).unwrap();
        let requested = vec!["a/b.pdf".to_string(), "a/c.pdf".to_string()];

        let urls = storage().to_signed_urls(&requested, items).unwrap();
        assert_eq!(
            urls[0].signed_url.as_deref(),
            Some("https://project.supabase.co/storage/v1/object/sign/docs/a/b.pdf?token=t1")
        );
        assert!(urls[0].error.is_none());
        assert_eq!(urls[1].path, "a/c.pdf");
        assert!(urls[1].signed_url.is_none());
        assert!(urls[1].error.is_some());
    }

    #[test]
    fn test_response_matched_by_path() {
        let raw = r#"[
            {"error": null, "path": "a/c.pdf", "signedURL": "/object/sign/docs/a/c.pdf?token=tc"},
            {"error": null, "path": "a/b.pdf", "signedURL": "/object/sign/docs/a/b.pdf?token=tb"}
        ]"#;
        let items: Vec<SignResponseItem> = serde_json::from_str(raw).unwrap();
        let requested = vec!["a/b.pdf".to_string(), "a/c.pdf".to_string()];

        let urls = storage().to_signed_urls(&requested, items).unwrap();
        assert_eq!(urls[0].path, "a/b.pdf");
        assert!(urls[0].signed_url.as_deref().unwrap().ends_with("a/b.pdf?token=tb"));
        assert_eq!(urls[1].path, "a/c.pdf");
        assert!(urls[1].signed_url.as_deref().unwrap().ends_with("a/c.pdf?token=tc"));
    }

    #[test]
    fn test_unmatched_path_degrades_one_entry() {
        let raw = r#"[
            {"error": null, "path": "a/b.pdf", "signedURL": "/object/sign/docs/a/b.pdf?token=tb"},
            {"error": null, "path": "a/other.pdf", "signedURL": "/object/sign/docs/a/other.pdf?token=to"}
        ]"#;
        let items: Vec<SignResponseItem> = serde_json::from_str(raw).unwrap();
        let requested = vec!["a/b.pdf".to_string(), "a/c.pdf".to_string()];

        let urls = storage().to_signed_urls(&requested, items).unwrap();
        assert!(urls[0].signed_url.is_some());
        assert_eq!(urls[1].path, "a/c.pdf");
        assert!(urls[1].signed_url.is_none());
        assert!(urls[1].error.is_some());
    }

    #[test]
    fn test_short_response_is_an_error() {
        let items: Vec<SignResponseItem> = serde_json::from_str(
            r#"[{"error": null, "path": "a/b.pdf", "signedURL": "/x"}]"#,
        )
        .unwrap();
        let requested = vec!["a/b.pdf".to_string(), "a/c.pdf".to_string()];

        assert!(matches!(
            storage().to_signed_urls(&requested, items),
            Err(Error::Storage(_))
        ));
    }
}
