//! HTTP surface of the bridge.
//!
//! ## Routes
//!
//! - `GET /ping` - Liveness probe, echoes the request path
//! - `GET /health` - Shallow health check
//! - `GET /metrics` - Prometheus metrics
//! - `POST /queue-task` - Publishes a scene notification directly, optionally
//!   to the priority topic
//! - `POST /internal/deploy` - Hands an entity to the deployer, as the
//!   synchronization feed would
//!
//! Both `POST` routes require the shared secret in the `Authorization` header.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use herald_core::{DeploymentNotification, Entity};

use crate::deployer::EntityDeployer;
use crate::metrics::serve_metrics;
use crate::publish::Publisher;

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    deployer: Arc<dyn EntityDeployer>,
    scenes: Option<Arc<dyn Publisher>>,
    priority_scenes: Option<Arc<dyn Publisher>>,
    queue_secret: Option<Arc<str>>,
}

impl AppState {
    /// Creates handler state around a deployer.
    pub fn new(deployer: Arc<dyn EntityDeployer>) -> Self {
        Self {
            deployer,
            scenes: None,
            priority_scenes: None,
            queue_secret: None,
        }
    }

    /// Sets the topics used by `/queue-task`.
    #[must_use]
    pub fn with_scene_topics(
        mut self,
        scenes: Option<Arc<dyn Publisher>>,
        priority_scenes: Option<Arc<dyn Publisher>>,
    ) -> Self {
        self.scenes = scenes;
        self.priority_scenes = priority_scenes;
        self
    }

    /// Sets the shared secret. Without one, the `POST` routes reject every request.
    #[must_use]
    pub fn with_queue_secret(mut self, secret: Option<String>) -> Self {
        self.queue_secret = secret.map(Arc::from);
        self
    }

    fn is_authorized(&self, headers: &HeaderMap) -> bool {
        let Some(secret) = self.queue_secret.as_deref() else {
            return false;
        };
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value == secret)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("scenes", &self.scenes.as_ref().map(|p| p.topic().to_string()))
            .field(
                "priority_scenes",
                &self.priority_scenes.as_ref().map(|p| p.topic().to_string()),
            )
            .field("queue_secret", &self.queue_secret.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

/// Builds the bridge router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/health", get(health))
        .route("/metrics", get(serve_metrics))
        .route("/queue-task", post(queue_task))
        .route("/internal/deploy", post(internal_deploy))
        .with_state(state)
}

async fn ping(uri: Uri) -> String {
    uri.path().to_string()
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Body of `POST /queue-task`.
#[derive(Debug, Deserialize)]
struct QueueTaskRequest {
    #[serde(flatten)]
    notification: DeploymentNotification,
    #[serde(default)]
    prioritize: bool,
}

async fn queue_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
    body: Bytes,
) -> Response {
    if !state.is_authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    let request: QueueTaskRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("Invalid body: {e}")).into_response();
        }
    };

    let publisher = if request.prioritize {
        let Some(publisher) = &state.priority_scenes else {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Missing priority scene topic configuration",
            )
                .into_response();
        };
        publisher
    } else {
        let Some(publisher) = &state.scenes else {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Missing scene topic configuration",
            )
                .into_response();
        };
        publisher
    };

    match publisher.publish(&request.notification).await {
        Ok(receipt) => {
            tracing::info!(
                entity_id = %request.notification.entity.entity_id,
                topic = %publisher.topic(),
                message_id = %receipt.message_id,
                prioritize = request.prioritize,
                "Queued task published"
            );
            (StatusCode::OK, uri.path().to_string()).into_response()
        }
        Err(error) => {
            tracing::error!(error = %error, "Failed to publish queued task");
            (StatusCode::BAD_GATEWAY, error.to_string()).into_response()
        }
    }
}

/// Body of `POST /internal/deploy`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeployRequest {
    entity: Entity,
    #[serde(default)]
    content_server_urls: Vec<String>,
}

async fn internal_deploy(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.is_authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    let request: DeployRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("Invalid body: {e}")).into_response();
        }
    };

    state
        .deployer
        .deploy_entity(request.entity, request.content_server_urls, None)
        .await;
    StatusCode::ACCEPTED.into_response()
}
