//! Ingestion worker binary
//!
//! Run with: cargo run -p docsync-worker --bin docsync-worker

use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docsync_worker::config::{IngestConfig, QueueBackend};
use docsync_worker::processing::{IngestPipeline, IngestWorker, JobQueue, MemoryJobQueue, WorkerConfig};
use docsync_worker::providers::{
    ChromaVectorStore, EmbeddingProvider, FileStatusStore, ObjectStorage, OllamaEmbedder,
    SupabaseStorage, TracingFileStatusStore, VectorStore,
};
use docsync_worker::server::{state::AppState, DocsyncServer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docsync_worker=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = IngestConfig::load().context("Failed to load configuration")?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Queue: {} ({:?})", config.queue.queue_name, config.queue.backend);
    tracing::info!("  - Collection: {} at {}", config.vector.collection_name, config.vector.url);
    tracing::info!("  - Embedding model: {}", config.embedding.model);
    tracing::info!(
        "  - Chunking: size {}, overlap {}",
        config.chunking.chunk_size,
        config.chunking.chunk_overlap
    );
    tracing::info!("  - Allowed extensions: {:?}", config.filter.allowed_extensions);

    let storage: Arc<dyn ObjectStorage> = Arc::new(SupabaseStorage::new(&config.storage)?);
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OllamaEmbedder::new(&config.embedding)?);
    let vector_store: Arc<dyn VectorStore> =
        Arc::new(ChromaVectorStore::new(&config.vector, embedder.clone())?);
    let status_store: Arc<dyn FileStatusStore> = Arc::new(TracingFileStatusStore);

    check_health("embedding", embedder.health_check().await);
    check_health("vector store", vector_store.health_check().await);

    // The queue registers under the same consumer name the worker logs
    let worker_config = WorkerConfig::from_config(&config);
    let queue = build_queue(&config, &worker_config.consumer_name).await?;
    let pipeline = Arc::new(IngestPipeline::new(
        &config,
        storage.clone(),
        vector_store.clone(),
        status_store,
    )?);

    let worker = IngestWorker::new(worker_config, queue.clone(), pipeline).start();

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server_task = if config.server.enabled {
        let server = DocsyncServer::new(
            config.server.clone(),
            AppState::new(queue.clone(), storage, vector_store),
        );
        Some(tokio::spawn(server.start(async move {
            let _ = shutdown_rx.changed().await;
        })))
    } else {
        if config.queue.backend == QueueBackend::Memory {
            tracing::warn!("HTTP server disabled with the memory queue: nothing can enqueue jobs");
        }
        None
    };

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    worker.stop().await?;
    if let Some(task) = server_task {
        task.await??;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

#[cfg_attr(not(feature = "redis"), allow(unused_variables))]
async fn build_queue(config: &IngestConfig, consumer: &str) -> anyhow::Result<Arc<dyn JobQueue>> {
    let queue = &config.queue;
    match queue.backend {
        QueueBackend::Memory => Ok(Arc::new(MemoryJobQueue::from_config(queue))),
        #[cfg(feature = "redis")]
        QueueBackend::Redis => Ok(Arc::new(
            docsync_worker::processing::RedisStreamQueue::connect(queue, consumer, config.claim_idle())
                .await
                .with_context(|| format!("Failed to connect to Redis at {}:{}", queue.redis_host, queue.redis_port))?,
        )),
        #[cfg(not(feature = "redis"))]
        QueueBackend::Redis => {
            anyhow::bail!("QUEUE_BACKEND=redis needs a build with the `redis` feature")
        }
    }
}

fn check_health(what: &str, result: docsync_worker::Result<bool>) {
    match result {
        Ok(true) => tracing::info!("{} is reachable", what),
        Ok(false) => tracing::warn!("{} reported unhealthy", what),
        Err(e) => tracing::warn!("{} not available: {}", what, e),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", err);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                if stream.recv().await.is_some() {
                    tracing::info!("Received SIGTERM");
                }
            }
            Err(err) => tracing::warn!("Failed to install SIGTERM handler: {}", err),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => {},
    }
}
