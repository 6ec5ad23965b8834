//! Configuration for the ingestion worker
//!
//! Defaults match a local development deployment (Redis, Chroma and Ollama on
//! localhost). A TOML file named by `DOCSYNC_CONFIG` may replace any section,
//! and environment variables override individual fields afterwards.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Main worker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Producer/admin HTTP server
    pub server: ServerConfig,
    /// Object storage (Supabase)
    pub storage: StorageConfig,
    /// Vector index (Chroma)
    pub vector: VectorDbConfig,
    /// Embedding model (Ollama)
    pub embedding: EmbeddingConfig,
    /// Job queue
    pub queue: QueueConfig,
    /// Allow-lists applied before fetching
    pub filter: FilterConfig,
    /// Text chunking
    pub chunking: ChunkingConfig,
    /// Worker concurrency and timeouts
    pub processing: ProcessingConfig,
}

impl IngestConfig {
    /// Load configuration: defaults, then the optional TOML file at
    /// `DOCSYNC_CONFIG`, then environment overrides. The result is validated.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("DOCSYNC_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| Error::config(format!("Invalid config file {}: {}", path.display(), e)))
    }

    /// Apply overrides from a variable lookup (normally `std::env::var`).
    ///
    /// Unset and empty variables leave the current value untouched.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PORT") {
            self.server.port = parse_var("PORT", &v)?;
        }

        if let Some(v) = get("SUPABASE_URL") {
            self.storage.supabase_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("SUPABASE_KEY") {
            self.storage.supabase_key = v;
        }
        if let Some(v) = get("DEFAULT_BUCKET_NAME") {
            self.storage.default_bucket = v;
        }
        if let Some(v) = get("SIGNED_URL_EXPIRES_IN") {
            self.storage.signed_url_expires_in = parse_var("SIGNED_URL_EXPIRES_IN", &v)?;
        }

        if let Some(v) = get("CHROMA_URL") {
            self.vector.url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("DEFAULT_VECTOR_COLLECTION_NAME") {
            self.vector.collection_name = v;
        }

        if let Some(v) = get("OLLAMA_URL") {
            self.embedding.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("EMBEDDING_MODEL_NAME") {
            self.embedding.model = v;
        }

        if let Some(v) = get("QUEUE_BACKEND") {
            self.queue.backend = match v.trim().to_ascii_lowercase().as_str() {
                "memory" => QueueBackend::Memory,
                "redis" => QueueBackend::Redis,
                other => {
                    return Err(Error::config(format!(
                        "QUEUE_BACKEND must be 'memory' or 'redis', got '{}'",
                        other
                    )))
                }
            };
        }
        if let Some(v) = get("DEFAULT_QUEUE_NAME") {
            self.queue.queue_name = v;
        }
        if let Some(v) = get("REDIS_HOST") {
            self.queue.redis_host = v;
        }
        if let Some(v) = get("REDIS_PORT") {
            self.queue.redis_port = parse_var("REDIS_PORT", &v)?;
        }
        if let Some(v) = get("REDIS_PASSWORD") {
            self.queue.redis_password = Some(v);
        }
        if let Some(v) = get("MAX_ATTEMPTS") {
            self.queue.max_attempts = parse_var("MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("CONSUMER_NAME") {
            self.queue.consumer_name = Some(v);
        }
        if let Some(v) = get("CLAIM_IDLE_SECS") {
            self.queue.claim_idle_secs = Some(parse_var("CLAIM_IDLE_SECS", &v)?);
        }
        if let Some(v) = get("RETAIN_FINISHED_JOBS") {
            self.queue.retain_finished_jobs = parse_var("RETAIN_FINISHED_JOBS", &v)?;
        }

        if let Some(v) = get("ALLOWED_FILE_TYPES") {
            self.filter.allowed_mime_types = split_list(&v);
        }
        if let Some(v) = get("ALLOWED_EXTENSIONS_FOR_SYNC") {
            self.filter.allowed_extensions = split_list(&v);
        }

        if let Some(v) = get("CHUNK_SIZE") {
            self.chunking.chunk_size = parse_var("CHUNK_SIZE", &v)?;
        }
        if let Some(v) = get("CHUNK_OVERLAP") {
            self.chunking.chunk_overlap = parse_var("CHUNK_OVERLAP", &v)?;
        }

        if let Some(v) = get("MAX_IN_FLIGHT") {
            self.processing.max_in_flight = parse_var("MAX_IN_FLIGHT", &v)?;
        }
        if let Some(v) = get("WORKER_CONCURRENCY") {
            self.processing.worker_concurrency = Some(parse_var("WORKER_CONCURRENCY", &v)?);
        }
        if let Some(v) = get("JOB_TIMEOUT_SECS") {
            self.processing.job_timeout_secs = parse_var("JOB_TIMEOUT_SECS", &v)?;
        }

        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;

        if self.processing.max_in_flight == 0 {
            return Err(Error::config("max_in_flight must be at least 1"));
        }
        if self.processing.worker_concurrency == Some(0) {
            return Err(Error::config("worker_concurrency must be at least 1"));
        }
        if self.processing.job_timeout_secs == 0 {
            return Err(Error::config("job_timeout_secs must be at least 1"));
        }
        if self.queue.max_attempts == 0 {
            return Err(Error::config("max_attempts must be at least 1"));
        }
        if let Some(idle) = self.queue.claim_idle_secs {
            if idle <= self.processing.job_timeout_secs {
                return Err(Error::config(
                    "claim_idle_secs must exceed job_timeout_secs, or running jobs get claimed twice",
                ));
            }
        }
        if self.storage.signed_url_expires_in == 0 {
            return Err(Error::config("signed_url_expires_in must be at least 1"));
        }
        if self.queue.queue_name.trim().is_empty() {
            return Err(Error::config("queue_name must not be empty"));
        }
        if self.vector.collection_name.trim().is_empty() {
            return Err(Error::config("collection_name must not be empty"));
        }

        Ok(())
    }

    /// Idle time before an unacknowledged Redis entry is reclaimed
    pub fn claim_idle(&self) -> Duration {
        let secs = self
            .queue
            .claim_idle_secs
            .unwrap_or(self.processing.job_timeout_secs + 60);
        Duration::from_secs(secs)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::config(format!("{} has invalid value '{}': {}", key, value, e)))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Run the HTTP surface alongside the worker
    pub enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            enable_cors: true,
            enabled: true,
        }
    }
}

/// Object storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Supabase project URL
    pub supabase_url: String,
    /// Supabase service key
    pub supabase_key: String,
    /// Bucket used when the batch does not name one
    pub default_bucket: String,
    /// Lifetime of signed download URLs in seconds
    pub signed_url_expires_in: u64,
    /// Timeout for a single download in seconds
    pub download_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_key: String::new(),
            default_bucket: "rag-bucket".to_string(),
            signed_url_expires_in: 3600, // 1 hour
            download_timeout_secs: 120,
        }
    }
}

/// Vector database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorDbConfig {
    /// Chroma base URL
    pub url: String,
    /// Collection chunks are written to
    pub collection_name: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            collection_name: "rag_collection".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Embedding (Ollama) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Ollama base URL
    pub base_url: String,
    /// Embedding model name
    pub model: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Number of retries for failed requests
    pub max_retries: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "bge-m3:latest".to_string(),
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

/// Queue backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// In-process queue (single worker process)
    #[default]
    Memory,
    /// Redis Streams consumer group
    Redis,
}

/// Job queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Backend
    pub backend: QueueBackend,
    /// Queue (stream) name
    pub queue_name: String,
    /// Consumer group shared by competing workers
    pub consumer_group: String,
    /// This worker's consumer name; generated when absent
    pub consumer_name: Option<String>,
    /// Idle time after which another consumer's unacknowledged entry is
    /// reclaimed (default: job timeout plus one minute)
    pub claim_idle_secs: Option<u64>,
    /// Records of completed and dead jobs kept for inspection
    pub retain_finished_jobs: usize,
    /// Redis host
    pub redis_host: String,
    /// Redis port
    pub redis_port: u16,
    /// Redis password
    pub redis_password: Option<String>,
    /// Attempts before a job is marked failed
    pub max_attempts: u32,
    /// First retry delay in milliseconds
    pub base_backoff_ms: u64,
    /// Upper bound for the retry delay in milliseconds
    pub max_backoff_ms: u64,
    /// How long an idle worker waits for a job before polling again
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            queue_name: "embed-queue".to_string(),
            consumer_group: "docsync-workers".to_string(),
            consumer_name: None,
            claim_idle_secs: None,
            retain_finished_jobs: 1_000,
            redis_host: "localhost".to_string(),
            redis_port: 6379,
            redis_password: None,
            max_attempts: 3,
            base_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            poll_interval_ms: 1_000,
        }
    }
}

impl QueueConfig {
    /// Connection URL for the Redis backend
    pub fn redis_url(&self) -> String {
        match &self.redis_password {
            Some(password) => format!(
                "redis://:{}@{}:{}/",
                password, self.redis_host, self.redis_port
            ),
            None => format!("redis://{}:{}/", self.redis_host, self.redis_port),
        }
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Allow-lists for sync eligibility
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Accepted MIME types
    pub allowed_mime_types: Vec<String>,
    /// Accepted extensions, with leading dot (".pdf")
    pub allowed_extensions: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            allowed_mime_types: vec![
                "application/pdf".to_string(),
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
                    .to_string(),
                "text/plain".to_string(),
                "text/markdown".to_string(),
                "text/html".to_string(),
            ],
            allowed_extensions: vec![
                ".pdf".to_string(),
                ".docx".to_string(),
                ".txt".to_string(),
                ".md".to_string(),
                ".html".to_string(),
            ],
        }
    }
}

/// Text chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters
    pub chunk_overlap: usize,
    /// Separators tried in order; "" splits into characters
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            separators: default_separators(),
        }
    }
}

impl ChunkingConfig {
    /// Overlap must be smaller than the chunk size
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::config("chunk_size must be at least 1"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.separators.is_empty() {
            return Err(Error::config("separators must not be empty"));
        }
        Ok(())
    }
}

fn default_separators() -> Vec<String> {
    vec![
        "\n\n".to_string(),
        "\n".to_string(),
        " ".to_string(),
        String::new(),
    ]
}

/// Processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Concurrent downloads, parses and writes within one job
    pub max_in_flight: usize,
    /// Jobs processed at once by one worker (default: CPU count, max 4)
    pub worker_concurrency: Option<usize>,
    /// Timeout for a whole job in seconds (default: 600 = 10 minutes)
    pub job_timeout_secs: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            worker_concurrency: None,
            job_timeout_secs: 600,
        }
    }
}

impl ProcessingConfig {
    /// Effective job concurrency
    pub fn worker_concurrency(&self) -> usize {
        self.worker_concurrency
            .unwrap_or_else(|| num_cpus::get().clamp(1, 4))
    }

    /// Job timeout as a duration
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunking.chunk_size, 1000);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.queue.queue_name, "embed-queue");
        assert_eq!(config.vector.collection_name, "rag_collection");
        assert_eq!(config.storage.default_bucket, "rag-bucket");
        assert_eq!(config.storage.signed_url_expires_in, 3600);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = IngestConfig::default();
        config
            .apply_env(lookup(&[
                ("ALLOWED_FILE_TYPES", "application/pdf, text/plain"),
                ("ALLOWED_EXTENSIONS_FOR_SYNC", ".pdf,.txt,"),
                ("CHUNK_SIZE", "500"),
                ("CHUNK_OVERLAP", "50"),
                ("REDIS_PORT", "6380"),
                ("QUEUE_BACKEND", "Redis"),
                ("CHROMA_URL", "http://chroma:8000/"),
                ("DEFAULT_BUCKET_NAME", ""),
            ]))
            .unwrap();

        assert_eq!(
            config.filter.allowed_mime_types,
            vec!["application/pdf", "text/plain"]
        );
        assert_eq!(config.filter.allowed_extensions, vec![".pdf", ".txt"]);
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.queue.redis_port, 6380);
        assert_eq!(config.queue.backend, QueueBackend::Redis);
        assert_eq!(config.vector.url, "http://chroma:8000");
        // empty values keep the default
        assert_eq!(config.storage.default_bucket, "rag-bucket");
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = IngestConfig::default();
        let err = config
            .apply_env(lookup(&[("CHUNK_SIZE", "lots")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = config
            .apply_env(lookup(&[("QUEUE_BACKEND", "kafka")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let mut config = IngestConfig::default();
        config.chunking.chunk_overlap = 1000;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.chunking.chunk_size = 0;
        config.chunking.chunk_overlap = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = IngestConfig::default();
        config.processing.max_in_flight = 0;
        assert!(config.validate().is_err());

        let mut config = IngestConfig::default();
        config.queue.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_claim_idle_follows_job_timeout() {
        let mut config = IngestConfig::default();
        assert_eq!(config.claim_idle(), Duration::from_secs(660));

        config
            .apply_env(lookup(&[("JOB_TIMEOUT_SECS", "30"), ("CLAIM_IDLE_SECS", "45")]))
            .unwrap();
        assert_eq!(config.claim_idle(), Duration::from_secs(45));
        assert!(config.validate().is_ok());

        config.queue.claim_idle_secs = Some(30);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_queue_retention_and_consumer_env() {
        let mut config = IngestConfig::default();
        assert_eq!(config.queue.retain_finished_jobs, 1_000);

        config
            .apply_env(lookup(&[("RETAIN_FINISHED_JOBS", "50"), ("CONSUMER_NAME", "worker-a")]))
            .unwrap();
        assert_eq!(config.queue.retain_finished_jobs, 50);
        assert_eq!(config.queue.consumer_name.as_deref(), Some("worker-a"));
    }

    #[test]
    fn test_partial_toml() {
        let config: IngestConfig = toml::from_str(
            r#"
            [chunking]
            chunk_size = 400
            chunk_overlap = 40

            [queue]
            backend = "redis"
            "#,
        )
        .unwrap();

        assert_eq!(config.chunking.chunk_size, 400);
        assert_eq!(config.chunking.separators.len(), 4);
        assert_eq!(config.queue.backend, QueueBackend::Redis);
        assert_eq!(config.queue.redis_port, 6379);
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_redis_url() {
        let mut queue = QueueConfig::default();
        assert_eq!(queue.redis_url(), "redis://localhost:6379/");
        queue.redis_password = Some("secret".to_string());
        assert_eq!(queue.redis_url(), "redis://:secret@localhost:6379/");
    }
}
