//! World sync reconciliation loop.
//!
//! Worlds are not announced on the synchronization feed, so this loop polls
//! the worlds index periodically and publishes a scene notification for every
//! world scene the existence ledger has not seen.
//!
//! ## Lifecycle
//!
//! `Stopped -> Running -> Stopping -> Stopped`. [`WorldSync::start`] spawns the
//! loop; [`WorldSync::stop`] signals it and waits for the task to exit. The stop
//! signal is observed between iterations, during the wait between iterations
//! and during index fetch retries. A reconciliation pass in flight always
//! completes.
//!
//! ## Failure Isolation
//!
//! - Index fetch failures are retried with a linear backoff
//!   (`attempt * retry_base_delay`) up to `max_retries` times
//! - A failed iteration is logged and the loop waits for the next one
//! - A failure on one scene never aborts the remaining scenes

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use herald_core::observability::world_sync_span;
use herald_core::{DeploymentNotification, Entity, Error, ExistenceLedger, LedgerKey, Result};

use crate::metrics;
use crate::publish::Publisher;

/// Default worlds index endpoint.
pub const DEFAULT_INDEX_URL: &str = "https://worlds-content-server.decentraland.org/index";

/// Default content server advertised for world scenes.
pub const DEFAULT_CONTENT_SERVER: &str = "https://worlds-content-server.decentraland.org";

/// World sync settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldSyncConfig {
    /// Worlds index endpoint.
    pub index_url: String,
    /// Content servers put in every world scene notification.
    pub content_server_urls: Vec<String>,
    /// Wait between iterations.
    pub interval: Duration,
    /// Retries after the first failed index request.
    pub max_retries: u32,
    /// Backoff unit; retry `n` waits `n * retry_base_delay`.
    pub retry_base_delay: Duration,
    /// Timeout of a single index request.
    pub request_timeout: Duration,
}

impl Default for WorldSyncConfig {
    fn default() -> Self {
        Self {
            index_url: DEFAULT_INDEX_URL.to_string(),
            content_server_urls: vec![DEFAULT_CONTENT_SERVER.to_string()],
            interval: Duration::from_secs(600),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Lifecycle state of the world sync loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldSyncState {
    /// No loop running.
    Stopped,
    /// Loop running.
    Running,
    /// Stop requested; waiting for the loop to exit.
    Stopping,
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationReport {
    /// Scene ids listed by the index.
    pub scenes: usize,
    /// Scenes published during this pass.
    pub published: usize,
    /// Scenes already present in the ledger.
    pub skipped: usize,
    /// Scenes whose publish or touch failed.
    pub failed: usize,
}

#[derive(Debug, Deserialize)]
struct IndexResponse {
    data: Vec<IndexWorld>,
}

#[derive(Debug, Deserialize)]
struct IndexWorld {
    scenes: Vec<IndexScene>,
}

#[derive(Debug, Deserialize)]
struct IndexScene {
    id: String,
}

/// Flattens an index body into scene ids across all worlds.
///
/// # Errors
///
/// Returns a serialization error when the body lacks `data[].scenes[].id`.
pub fn parse_scene_ids(body: &[u8]) -> Result<Vec<String>> {
    let index: IndexResponse = serde_json::from_slice(body)
        .map_err(|e| Error::serialization(format!("Invalid index response structure: {e}")))?;
    Ok(index
        .data
        .into_iter()
        .flat_map(|world| world.scenes)
        .map(|scene| scene.id)
        .collect())
}

/// Waits for `delay` or a stop request. Returns true if stop was requested.
async fn wait_or_stop(stop: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    let stopped = tokio::select! {
        () = tokio::time::sleep(delay) => false,
        _ = stop.wait_for(|stopped| *stopped) => true,
    };
    stopped || *stop.borrow()
}

struct SyncRunner {
    ledger: Arc<dyn ExistenceLedger>,
    publisher: Arc<dyn Publisher>,
    client: reqwest::Client,
    config: WorldSyncConfig,
}

impl SyncRunner {
    async fn fetch_once(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(&self.config.index_url)
            .send()
            .await
            .map_err(|e| Error::fetch(format!("Failed to fetch worlds index: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::http(status.as_u16(), body));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::fetch(format!("Failed to read worlds index: {e}")))?;
        parse_scene_ids(&body)
    }

    /// Fetches the index, retrying failures. `Ok(None)` means a stop arrived
    /// during a backoff.
    async fn fetch_scene_ids(
        &self,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<Option<Vec<String>>> {
        let mut attempt = 0_u32;
        loop {
            let error = match self.fetch_once().await {
                Ok(ids) => return Ok(Some(ids)),
                Err(error) => error,
            };

            if attempt >= self.config.max_retries {
                return Err(error);
            }
            attempt += 1;

            let delay = self.config.retry_base_delay * attempt;
            if matches!(error, Error::Http { status: 502 | 503, .. }) {
                tracing::warn!(
                    attempt,
                    ?delay,
                    error = %error,
                    "Worlds index unavailable, retrying"
                );
            } else {
                tracing::warn!(
                    attempt,
                    ?delay,
                    error = %error,
                    "Worlds index fetch failed, retrying"
                );
            }
            metrics::record_world_sync_fetch_retry();

            if wait_or_stop(stop, delay).await {
                tracing::info!(attempt, error = %error, "Index fetch retry abandoned on stop");
                return Ok(None);
            }
        }
    }

    async fn sync_scene(&self, scene_id: &str) -> Result<bool> {
        let key = LedgerKey::world_scene(scene_id);
        if self.ledger.exists(&key).await? {
            return Ok(false);
        }

        let notification = DeploymentNotification::new(
            Entity::untyped(scene_id),
            self.config.content_server_urls.clone(),
        );
        let receipt = self.publisher.publish(&notification).await?;
        self.ledger.touch(&key).await?;

        metrics::record_world_scene_published();
        tracing::info!(scene_id, message_id = %receipt.message_id, "World scene published");
        Ok(true)
    }

    async fn run_iteration(
        &self,
        stop: &mut watch::Receiver<bool>,
    ) -> Result<Option<IterationReport>> {
        let Some(scene_ids) = self.fetch_scene_ids(stop).await? else {
            return Ok(None);
        };
        let mut report = IterationReport {
            scenes: scene_ids.len(),
            ..IterationReport::default()
        };

        for scene_id in &scene_ids {
            match self.sync_scene(scene_id).await {
                Ok(true) => report.published += 1,
                Ok(false) => report.skipped += 1,
                Err(error) => {
                    report.failed += 1;
                    tracing::error!(
                        scene_id = %scene_id,
                        error = %error,
                        "Failed to sync world scene"
                    );
                }
            }
        }
        Ok(Some(report))
    }

    async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        tracing::info!(index_url = %self.config.index_url, "World sync started");
        let mut iteration = 0_u64;

        while !*stop.borrow() {
            iteration += 1;
            let result = self
                .run_iteration(&mut stop)
                .instrument(world_sync_span(iteration))
                .await;

            match result {
                Ok(None) => break,
                Ok(Some(report)) => {
                    metrics::record_world_sync_iteration(true);
                    tracing::info!(
                        iteration,
                        scenes = report.scenes,
                        published = report.published,
                        skipped = report.skipped,
                        failed = report.failed,
                        "World sync iteration completed"
                    );
                }
                Err(error) => {
                    metrics::record_world_sync_iteration(false);
                    tracing::error!(iteration, error = %error, "World sync iteration failed");
                }
            }

            if *stop.borrow() {
                break;
            }
            tracing::debug!(
                interval_secs = self.config.interval.as_secs(),
                "Waiting for next world sync iteration"
            );
            if wait_or_stop(&mut stop, self.config.interval).await {
                break;
            }
        }

        tracing::info!("World sync stopped");
    }
}

/// Periodic reconciliation of world scenes.
pub struct WorldSync {
    ledger: Arc<dyn ExistenceLedger>,
    publisher: Option<Arc<dyn Publisher>>,
    config: WorldSyncConfig,
    state: Mutex<WorldSyncState>,
    stop: watch::Sender<bool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorldSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldSync")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl WorldSync {
    /// Creates a stopped world sync.
    ///
    /// Without a publisher the loop refuses to start.
    pub fn new(
        ledger: Arc<dyn ExistenceLedger>,
        publisher: Option<Arc<dyn Publisher>>,
        config: WorldSyncConfig,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            ledger,
            publisher,
            config,
            state: Mutex::new(WorldSyncState::Stopped),
            stop,
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorldSyncState {
        self.state
            .lock()
            .map_or(WorldSyncState::Stopped, |state| *state)
    }

    fn set_state(&self, next: WorldSyncState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }

    fn runner(&self) -> Result<Arc<SyncRunner>> {
        let publisher = self
            .publisher
            .clone()
            .ok_or_else(|| Error::configuration("world sync requires a scenes publisher"))?;
        let client = reqwest::Client::builder()
            .timeout(self.config.request_timeout)
            .build()
            .map_err(|e| Error::configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Arc::new(SyncRunner {
            ledger: Arc::clone(&self.ledger),
            publisher,
            client,
            config: self.config.clone(),
        }))
    }

    /// Starts the loop in the background.
    ///
    /// Logs an error and stays stopped when no publisher is configured. A
    /// second call while running is ignored.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            tracing::warn!("World sync already running");
            return;
        }

        let runner = match self.runner() {
            Ok(runner) => runner,
            Err(error) => {
                tracing::error!(error = %error, "World sync not started");
                return;
            }
        };

        self.stop.send_replace(false);
        self.set_state(WorldSyncState::Running);
        *task = Some(tokio::spawn(runner.run(self.stop.subscribe())));
    }

    /// Signals the loop to stop and waits for it to exit.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        let Some(handle) = task.take() else {
            return;
        };

        self.set_state(WorldSyncState::Stopping);
        self.stop.send_replace(true);
        if let Err(error) = handle.await {
            tracing::error!(error = %error, "World sync task failed");
        }
        self.set_state(WorldSyncState::Stopped);
    }

    /// Runs a single reconciliation pass in the calling task.
    ///
    /// # Errors
    ///
    /// Returns an error when no publisher is configured or the index cannot
    /// be fetched within the retry budget.
    pub async fn run_once(&self) -> Result<IterationReport> {
        let runner = self.runner()?;
        let (_stop_tx, mut stop) = watch::channel(false);
        runner
            .run_iteration(&mut stop)
            .instrument(world_sync_span(1))
            .await?
            .ok_or_else(|| Error::Internal {
                message: "single world sync pass was stopped".into(),
            })
    }
}
