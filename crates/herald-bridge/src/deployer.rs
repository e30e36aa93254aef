//! Deployment admission and notification fan-out.
//!
//! The [`Deployer`] receives entities from the synchronization feed and decides,
//! per entity, whether a notification must be sent:
//!
//! 1. **Destinations**: scenes go to the scenes topic, wearables and emotes to
//!    the wearable/emotes topic, when those topics are configured
//! 2. **Rect filter**: scenes with pointers must hit the configured rectangle
//! 3. **Dedup**: entities already in the existence ledger are skipped
//! 4. **Backpressure**: admission waits until the scheduler has room
//! 5. **Job**: touch the ledger, publish to each destination, acknowledge
//!
//! ## Acknowledgment
//!
//! The feed's [`MarkAsDeployed`] handle is consumed exactly once on every path
//! except a retryable failure, where it is dropped unused so the feed
//! redelivers the entity. A failure is retryable unless its message embeds a
//! 4xx status (see [`herald_core::error::is_retryable`]).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use herald_core::observability::deploy_span;
use herald_core::{
    DeploymentNotification, Entity, EntityType, Error, ExistenceLedger, LedgerKey,
    MarkAsDeployed, RectFilter, Result,
};

use crate::metrics::{self, DeploymentOutcome};
use crate::publish::Publisher;
use crate::scheduler::JobScheduler;

/// Scheduler size at which admission blocks.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 1000;

/// Entry point the synchronization feed calls for every entity it discovers.
#[async_trait]
pub trait EntityDeployer: Send + Sync + 'static {
    /// Handles one entity. Never fails; outcomes are logged and acknowledged.
    async fn deploy_entity(
        &self,
        entity: Entity,
        content_server_urls: Vec<String>,
        mark_as_deployed: Option<MarkAsDeployed>,
    );

    /// Called by the feed when it has nothing left to deliver.
    async fn on_idle(&self);
}

/// Topics notifications are routed to. A missing topic disables its route.
#[derive(Clone, Default)]
pub struct Topics {
    /// Receives scene notifications.
    pub scenes: Option<Arc<dyn Publisher>>,
    /// Receives wearable and emote notifications.
    pub wearable_emotes: Option<Arc<dyn Publisher>>,
}

impl std::fmt::Debug for Topics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topics")
            .field("scenes", &self.scenes.as_ref().map(|p| p.topic().to_string()))
            .field(
                "wearable_emotes",
                &self.wearable_emotes.as_ref().map(|p| p.topic().to_string()),
            )
            .finish()
    }
}

/// Deployer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployerConfig {
    /// Restricts scene deployments to a parcel rectangle.
    pub rect_filter: Option<RectFilter>,
    /// Admission blocks while the scheduler holds this many jobs.
    pub max_queue_size: usize,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            rect_filter: None,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

enum Admission {
    Filtered,
    Duplicate,
    Admitted(Vec<Arc<dyn Publisher>>),
}

/// Gates, filters, deduplicates and fans out entity deployments.
pub struct Deployer {
    ledger: Arc<dyn ExistenceLedger>,
    scheduler: Arc<dyn JobScheduler>,
    topics: Topics,
    config: DeployerConfig,
}

impl std::fmt::Debug for Deployer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deployer")
            .field("topics", &self.topics)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Deployer {
    /// Creates a deployer.
    ///
    /// A max queue size of zero is raised to one.
    pub fn new(
        ledger: Arc<dyn ExistenceLedger>,
        scheduler: Arc<dyn JobScheduler>,
        topics: Topics,
        config: DeployerConfig,
    ) -> Self {
        Self {
            ledger,
            scheduler,
            topics,
            config: DeployerConfig {
                max_queue_size: config.max_queue_size.max(1),
                ..config
            },
        }
    }

    /// Handles one entity delivered by the feed.
    ///
    /// Returns once the entity has been filtered, deduplicated or handed to
    /// the scheduler. Admitted jobs finish in the background.
    pub async fn deploy_entity(
        &self,
        entity: Entity,
        content_server_urls: Vec<String>,
        mark_as_deployed: Option<MarkAsDeployed>,
    ) {
        let span = deploy_span(&entity.entity_id, entity.type_name());
        let ack = mark_as_deployed.unwrap_or_else(MarkAsDeployed::noop);

        async move {
            let publishers = match self.admit(&entity).await {
                Ok(Admission::Filtered) => {
                    tracing::info!("Scene outside of the configured rect filter, skipping");
                    metrics::record_deployment(DeploymentOutcome::Filtered);
                    ack.mark().await;
                    return;
                }
                Ok(Admission::Duplicate) => {
                    tracing::debug!("Entity already handled or has no destination");
                    metrics::record_deployment(DeploymentOutcome::Duplicate);
                    ack.mark().await;
                    return;
                }
                Ok(Admission::Admitted(publishers)) => publishers,
                Err(error) => {
                    handle_failure(&error, ack).await;
                    return;
                }
            };

            self.scheduler
                .on_size_less_than(self.config.max_queue_size)
                .await;

            let job = DeploymentJob {
                ledger: Arc::clone(&self.ledger),
                publishers,
                notification: DeploymentNotification::new(entity, content_server_urls),
                ack,
            };
            self.scheduler
                .schedule_job(Box::pin(job.run().instrument(tracing::Span::current())));
            metrics::record_deployment(DeploymentOutcome::Admitted);
        }
        .instrument(span)
        .await;
    }

    /// Logs that the feed went idle.
    pub async fn on_idle(&self) {
        tracing::info!(queued_jobs = self.scheduler.size(), "Deployer idle");
    }

    fn destinations(&self, entity: &Entity) -> Vec<Arc<dyn Publisher>> {
        let scenes = entity
            .is_type(&EntityType::Scene)
            .then(|| self.topics.scenes.clone())
            .flatten();
        let wearable_emotes = (entity.is_type(&EntityType::Wearable)
            || entity.is_type(&EntityType::Emote))
        .then(|| self.topics.wearable_emotes.clone())
        .flatten();

        scenes.into_iter().chain(wearable_emotes).collect()
    }

    fn is_filtered(&self, entity: &Entity, sends_to_scenes: bool) -> bool {
        let (Some(rect), Some(pointers)) = (self.config.rect_filter, &entity.pointers) else {
            return false;
        };
        sends_to_scenes && !rect.any_inside(pointers.iter().map(String::as_str))
    }

    async fn admit(&self, entity: &Entity) -> Result<Admission> {
        let publishers = self.destinations(entity);
        let sends_to_scenes = entity.is_type(&EntityType::Scene) && !publishers.is_empty();

        if self.is_filtered(entity, sends_to_scenes) {
            return Ok(Admission::Filtered);
        }

        if publishers.is_empty() {
            return Ok(Admission::Duplicate);
        }

        if self
            .ledger
            .exists(&LedgerKey::entity(&entity.entity_id))
            .await?
        {
            return Ok(Admission::Duplicate);
        }

        Ok(Admission::Admitted(publishers))
    }
}

#[async_trait]
impl EntityDeployer for Deployer {
    async fn deploy_entity(
        &self,
        entity: Entity,
        content_server_urls: Vec<String>,
        mark_as_deployed: Option<MarkAsDeployed>,
    ) {
        Deployer::deploy_entity(self, entity, content_server_urls, mark_as_deployed).await;
    }

    async fn on_idle(&self) {
        Deployer::on_idle(self).await;
    }
}

/// Work performed once an entity is admitted.
struct DeploymentJob {
    ledger: Arc<dyn ExistenceLedger>,
    publishers: Vec<Arc<dyn Publisher>>,
    notification: DeploymentNotification,
    ack: MarkAsDeployed,
}

impl DeploymentJob {
    async fn run(self) {
        let Self {
            ledger,
            publishers,
            notification,
            ack,
        } = self;

        match publish_all(ledger.as_ref(), &publishers, &notification).await {
            Ok(()) => {
                metrics::record_deployment(DeploymentOutcome::Published);
                ack.mark().await;
            }
            Err(error) => handle_failure(&error, ack).await,
        }
    }
}

async fn publish_all(
    ledger: &dyn ExistenceLedger,
    publishers: &[Arc<dyn Publisher>],
    notification: &DeploymentNotification,
) -> Result<()> {
    ledger
        .touch(&LedgerKey::entity(&notification.entity.entity_id))
        .await?;
    tracing::debug!("Entity stored in ledger");

    for publisher in publishers {
        let receipt = publisher.publish(notification).await?;
        tracing::info!(
            topic = %publisher.topic(),
            message_id = %receipt.message_id,
            "Entity notification published"
        );
    }
    Ok(())
}

async fn handle_failure(error: &Error, ack: MarkAsDeployed) {
    if error.is_retryable() {
        tracing::error!(error = %error, "Failed to deploy entity, leaving it for redelivery");
        metrics::record_deployment(DeploymentOutcome::RetryableFailure);
        drop(ack);
    } else {
        tracing::error!(error = %error, "Failed to deploy entity with a non-retryable error");
        metrics::record_deployment(DeploymentOutcome::NonRetryableFailure);
        ack.mark().await;
    }
}
