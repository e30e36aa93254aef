//! # herald-bridge
//!
//! Deployment notification bridge service.
//!
//! ## Modes
//!
//! - **Service Mode**: runs the deployer, the world sync loop and the HTTP
//!   endpoints until Ctrl-C or SIGTERM
//! - **CLI Mode**: a single world sync pass for manual recovery
//!
//! ## Usage
//!
//! ```bash
//! # Run as service
//! herald-bridge serve --port 5000 --scenes-topic projects/p/topics/scenes
//!
//! # One world sync pass against a local emulator
//! PUBLISH_ENDPOINT=http://localhost:8085 herald-bridge world-sync-once --in-memory-ledger
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;

use herald_bridge::config::{Args, Commands, ServeArgs, TopicArgs};
use herald_bridge::server::{AppState, router};
use herald_bridge::{
    Deployer, JobQueue, PubSubConfig, PubSubPublisher, Publisher, Topics, WorldSync,
};
use herald_core::{
    ExistenceLedger, FolderBackend, LogFormat, MemoryBackend, StorageLedger, init_logging,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(LogFormat::from_env());
    let args = Args::parse();

    let ledger = build_ledger(&args).await?;
    let topics = PublisherSet::build(&args.topics).await?;

    match args.command {
        Commands::Serve(serve) => {
            run_service(serve, ledger, topics, args.world_sync.config()).await
        }
        Commands::WorldSyncOnce => {
            let world_sync = WorldSync::new(ledger, topics.scenes, args.world_sync.config());
            let report = world_sync
                .run_once()
                .await
                .map_err(|err| anyhow!("world sync run failed: {err}"))?;
            tracing::info!(?report, "World sync pass completed");
            Ok(())
        }
    }
}

async fn build_ledger(args: &Args) -> Result<Arc<dyn ExistenceLedger>> {
    if args.in_memory_ledger {
        tracing::warn!(
            "Using an in-memory existence ledger; deployments will be re-sent on restart"
        );
        return Ok(Arc::new(StorageLedger::new(MemoryBackend::new())));
    }

    let backend = FolderBackend::new(&args.storage_folder)
        .await
        .with_context(|| {
            format!(
                "failed to open storage folder {}",
                args.storage_folder.display()
            )
        })?;
    Ok(Arc::new(StorageLedger::new(backend)))
}

/// Publishers built from the topic configuration.
struct PublisherSet {
    scenes: Option<Arc<dyn Publisher>>,
    priority_scenes: Option<Arc<dyn Publisher>>,
    wearable_emotes: Option<Arc<dyn Publisher>>,
}

impl PublisherSet {
    async fn build(args: &TopicArgs) -> Result<Self> {
        Ok(Self {
            scenes: publisher(args, args.scenes_topic.as_deref()).await?,
            priority_scenes: publisher(args, args.priority_scenes_topic.as_deref()).await?,
            wearable_emotes: publisher(args, args.wearable_emotes_topic.as_deref()).await?,
        })
    }
}

async fn publisher(args: &TopicArgs, topic: Option<&str>) -> Result<Option<Arc<dyn Publisher>>> {
    let Some(topic) = topic else {
        return Ok(None);
    };

    let mut config = PubSubConfig::new(topic);
    if let Some(endpoint) = &args.publish_endpoint {
        config = config.with_endpoint(endpoint.clone());
    }

    #[cfg(feature = "gcp")]
    let publisher = if args.publish_endpoint.is_some() {
        PubSubPublisher::new(config)?
    } else {
        PubSubPublisher::with_gcp_auth(config).await?
    };
    #[cfg(not(feature = "gcp"))]
    let publisher = PubSubPublisher::new(config)?;

    tracing::info!(topic, "Publisher configured");
    let publisher: Arc<dyn Publisher> = Arc::new(publisher);
    Ok(Some(publisher))
}

async fn run_service(
    serve: ServeArgs,
    ledger: Arc<dyn ExistenceLedger>,
    topics: PublisherSet,
    world_sync_config: herald_bridge::WorldSyncConfig,
) -> Result<()> {
    herald_bridge::metrics::init_metrics();

    let queue = JobQueue::new("deployments", serve.job_queue_config());
    let deployer = Arc::new(Deployer::new(
        Arc::clone(&ledger),
        Arc::new(queue.clone()),
        Topics {
            scenes: topics.scenes.clone(),
            wearable_emotes: topics.wearable_emotes.clone(),
        },
        serve.deployer_config(),
    ));

    let world_sync = WorldSync::new(Arc::clone(&ledger), topics.scenes.clone(), world_sync_config);
    if serve.disable_world_sync {
        tracing::info!("World sync disabled");
    } else {
        world_sync.start().await;
    }

    let state = AppState::new(deployer)
        .with_scene_topics(topics.scenes, topics.priority_scenes)
        .with_queue_secret(serve.queue_secret.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], serve.port));
    tracing::info!(%addr, "Starting herald bridge");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    world_sync.stop().await;

    let drain_timeout = serve.job_queue_config().timeout;
    if tokio::time::timeout(drain_timeout, queue.on_idle()).await.is_err() {
        tracing::warn!(
            pending_jobs = herald_bridge::JobScheduler::size(&queue),
            "Job queue did not drain before shutdown"
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
