//! HTTP surface for producers and operators: enqueue jobs, inspect the queue

pub mod routes;
pub mod state;

use axum::{http::StatusCode, routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use state::AppState;

/// Producer/admin HTTP server
pub struct DocsyncServer {
    config: ServerConfig,
    state: AppState,
}

impl DocsyncServer {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let router = Router::new()
            .route("/health", get(health_check))
            .route("/ready", get(readiness))
            .nest("/api", routes::api_routes())
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
        } else {
            router
        }
    }

    /// Serve until `shutdown` resolves
    pub async fn start<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = self
            .address()
            .parse()
            .map_err(|e| Error::config(format!("Invalid address: {}", e)))?;

        let router = self.router();

        tracing::info!("HTTP server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::config(format!("Failed to bind {}: {}", addr, e)))?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::internal(format!("Server error: {}", e)))?;

        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Readiness check endpoint
async fn readiness(state: axum::extract::State<AppState>) -> StatusCode {
    if state.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::{JobQueue, MemoryJobQueue};
    use crate::providers::{MemoryObjectStorage, MemoryVectorStore};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn server() -> (DocsyncServer, Arc<MemoryJobQueue>) {
        let queue = Arc::new(MemoryJobQueue::new(3));
        let state = AppState::new(
            queue.clone(),
            Arc::new(MemoryObjectStorage::new()),
            Arc::new(MemoryVectorStore::new()),
        );
        (DocsyncServer::new(ServerConfig::default(), state), queue)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_job(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/jobs")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let (server, _) = server();

        let response = server
            .router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = server
            .router()
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_enqueue_and_fetch_job() {
        let (server, queue) = server();

        let response = server
            .router()
            .oneshot(post_job(json!({
                "syncId": "sync-7",
                "payloads": [{
                    "fileId": "f1",
                    "taskId": "t1",
                    "bucketName": "docs",
                    "resourcePath": "uploads/a.pdf",
                    "contentType": "application/pdf",
                    "originalFileName": "a.pdf",
                    "metadata": {"team": "legal", "version": 2}
                }]
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = body_json(response).await;
        assert_eq!(body["syncId"], "sync-7");
        assert_eq!(body["itemsQueued"], 1);
        let job_id = body["jobId"].as_str().unwrap().to_string();
        assert!(queue.record(&job_id).await.unwrap().is_some());

        let response = server
            .router()
            .oneshot(
                Request::get(format!("/api/jobs/{}", job_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let record = body_json(response).await;
        assert_eq!(record["status"], "queued");
        assert_eq!(record["total_items"], 1);
    }

    #[tokio::test]
    async fn test_empty_payloads_rejected() {
        let (server, _) = server();

        let response = server
            .router()
            .oneshot(post_job(json!({"syncId": "s", "payloads": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"]["type"], "validation_error");
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let (server, _) = server();

        let response = server
            .router()
            .oneshot(Request::get("/api/jobs/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_queue_stats() {
        let (server, queue) = server();
        queue
            .enqueue(serde_json::from_value(json!({
                "syncId": "s",
                "payloads": [{
                    "fileId": "f",
                    "resourcePath": "a.txt",
                    "contentType": "text/plain",
                    "originalFileName": "a.txt"
                }]
            })).unwrap())
            .await
            .unwrap();

        let response = server
            .router()
            .oneshot(Request::get("/api/queue/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["backend"], "memory");
        assert_eq!(body["total_jobs"], 1);
        assert_eq!(body["queued"], 1);
    }
}
