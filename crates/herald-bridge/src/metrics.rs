//! Bridge metrics.
//!
//! Prometheus metrics for the deployment pipeline:
//! - Deployment outcomes (filtered, duplicate, admitted, published, failures)
//! - Notifications published per topic
//! - Job queue size
//! - World sync iterations, published scenes and index fetch retries

use std::sync::OnceLock;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// ============================================================================
// Metric Names
// ============================================================================

/// Deployments by outcome.
pub const DEPLOYMENTS_TOTAL: &str = "herald_deployments_total";

/// Notifications published by topic.
pub const NOTIFICATIONS_PUBLISHED_TOTAL: &str = "herald_notifications_published_total";

/// Jobs queued or running.
pub const JOB_QUEUE_SIZE: &str = "herald_job_queue_size";

/// World sync iterations by status.
pub const WORLD_SYNC_ITERATIONS_TOTAL: &str = "herald_world_sync_iterations_total";

/// World scenes published.
pub const WORLD_SYNC_SCENES_PUBLISHED_TOTAL: &str = "herald_world_sync_scenes_published_total";

/// Index fetch retries.
pub const WORLD_SYNC_FETCH_RETRIES_TOTAL: &str = "herald_world_sync_fetch_retries_total";

/// Outcome of a single `deploy_entity` call or job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentOutcome {
    /// Scene outside the configured rectangle.
    Filtered,
    /// Entity already in the ledger, or no topic accepts it.
    Duplicate,
    /// Handed to the job scheduler.
    Admitted,
    /// Published to every destination and acknowledged.
    Published,
    /// Failed; the feed will redeliver.
    RetryableFailure,
    /// Failed permanently; acknowledged anyway.
    NonRetryableFailure,
}

impl DeploymentOutcome {
    /// Returns the label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Filtered => "filtered",
            Self::Duplicate => "duplicate",
            Self::Admitted => "admitted",
            Self::Published => "published",
            Self::RetryableFailure => "retryable_failure",
            Self::NonRetryableFailure => "non_retryable_failure",
        }
    }
}

// ============================================================================
// Prometheus Recorder
// ============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initializes the global metrics recorder with Prometheus exporter.
///
/// Safe to call multiple times; subsequent calls are no-ops.
///
/// # Panics
///
/// Panics if the Prometheus recorder cannot be installed. The service should
/// not start without it.
#[allow(clippy::panic)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .unwrap_or_else(|e| panic!("failed to install prometheus recorder: {e}"));

            describe_counter!(DEPLOYMENTS_TOTAL, "Deployment notifications by outcome");
            describe_counter!(
                NOTIFICATIONS_PUBLISHED_TOTAL,
                "Notifications accepted by a topic"
            );
            describe_gauge!(JOB_QUEUE_SIZE, "Deployment jobs queued or running");
            describe_counter!(
                WORLD_SYNC_ITERATIONS_TOTAL,
                "World sync iterations by status"
            );
            describe_counter!(
                WORLD_SYNC_SCENES_PUBLISHED_TOTAL,
                "World scenes published by world sync"
            );
            describe_counter!(
                WORLD_SYNC_FETCH_RETRIES_TOTAL,
                "Retries while fetching the world index"
            );

            tracing::info!("Prometheus metrics recorder initialized");
            handle
        })
        .clone()
}

/// Returns the global Prometheus handle, if initialized.
#[must_use]
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// ============================================================================
// Metrics Endpoint
// ============================================================================

/// Handler for the `/metrics` endpoint.
pub async fn serve_metrics() -> impl IntoResponse {
    match prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [("content-type", "text/plain; charset=utf-8")],
            "Metrics not initialized".to_string(),
        ),
    }
}

// ============================================================================
// Metric Recording
// ============================================================================

/// Records a deployment outcome.
pub fn record_deployment(outcome: DeploymentOutcome) {
    counter!(DEPLOYMENTS_TOTAL, "outcome" => outcome.as_str()).increment(1);
}

/// Records a notification accepted by `topic`.
pub fn record_notification_published(topic: &str) {
    counter!(NOTIFICATIONS_PUBLISHED_TOTAL, "topic" => topic.to_string()).increment(1);
}

/// Updates the job queue size gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_job_queue_size(queue: &str, size: usize) {
    gauge!(JOB_QUEUE_SIZE, "queue" => queue.to_string()).set(size as f64);
}

/// Records a finished world sync iteration.
pub fn record_world_sync_iteration(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(WORLD_SYNC_ITERATIONS_TOTAL, "status" => status).increment(1);
}

/// Records a world scene published by world sync.
pub fn record_world_scene_published() {
    counter!(WORLD_SYNC_SCENES_PUBLISHED_TOTAL).increment(1);
}

/// Records a retry of the world index fetch.
pub fn record_world_sync_fetch_retry() {
    counter!(WORLD_SYNC_FETCH_RETRIES_TOTAL).increment(1);
}
