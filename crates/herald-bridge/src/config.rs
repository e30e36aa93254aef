//! Command line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::builder::RangedU64ValueParser;
use clap::{Args as ClapArgs, Parser, Subcommand};

use herald_core::RectFilter;

use crate::deployer::DeployerConfig;
use crate::scheduler::JobQueueConfig;
use crate::world_sync::{DEFAULT_CONTENT_SERVER, DEFAULT_INDEX_URL, WorldSyncConfig};

/// Herald deployment notification bridge.
#[derive(Debug, Parser)]
#[command(name = "herald-bridge")]
#[command(about = "Forwards entity deployments to pub/sub topics")]
#[command(version)]
pub struct Args {
    /// Folder the existence ledger writes to.
    #[arg(long, env = "HERALD_STORAGE_FOLDER", default_value = "content", global = true)]
    pub storage_folder: PathBuf,

    /// Keep the existence ledger in memory (development only).
    #[arg(long, global = true)]
    pub in_memory_ledger: bool,

    /// Topics notifications are published to.
    #[command(flatten)]
    pub topics: TopicArgs,

    /// World sync settings.
    #[command(flatten)]
    pub world_sync: WorldSyncArgs,

    /// Command to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Topic configuration. An absent topic disables its route.
#[derive(Debug, Clone, ClapArgs)]
pub struct TopicArgs {
    /// Topic receiving scene notifications.
    #[arg(long, env = "SCENE_TOPIC", global = true)]
    pub scenes_topic: Option<String>,

    /// Topic receiving prioritized scene notifications.
    #[arg(long, env = "PRIORITY_SCENE_TOPIC", global = true)]
    pub priority_scenes_topic: Option<String>,

    /// Topic receiving wearable and emote notifications.
    #[arg(long, env = "WEARABLE_EMOTES_TOPIC", global = true)]
    pub wearable_emotes_topic: Option<String>,

    /// Pub/Sub API endpoint override (e.g. a local emulator).
    #[arg(long, env = "PUBLISH_ENDPOINT", global = true)]
    pub publish_endpoint: Option<String>,
}

/// World sync configuration.
#[derive(Debug, Clone, ClapArgs)]
pub struct WorldSyncArgs {
    /// Worlds index endpoint.
    #[arg(long, env = "WORLD_SYNC_INDEX_URL", default_value = DEFAULT_INDEX_URL, global = true)]
    pub world_sync_index_url: String,

    /// Content server advertised in world scene notifications.
    #[arg(
        long,
        env = "WORLD_SYNC_CONTENT_SERVER",
        default_value = DEFAULT_CONTENT_SERVER,
        global = true
    )]
    pub world_sync_content_server: String,

    /// Seconds between world sync iterations.
    #[arg(long, env = "WORLD_SYNC_INTERVAL_SECS", default_value = "600", global = true)]
    pub world_sync_interval_secs: u64,

    /// Retries after a failed index fetch.
    #[arg(long, env = "WORLD_SYNC_MAX_RETRIES", default_value = "3", global = true)]
    pub world_sync_max_retries: u32,

    /// Backoff unit in milliseconds between index fetch retries.
    #[arg(long, env = "WORLD_SYNC_RETRY_BASE_MS", default_value = "1000", global = true)]
    pub world_sync_retry_base_ms: u64,
}

impl WorldSyncArgs {
    /// Builds the world sync configuration.
    #[must_use]
    pub fn config(&self) -> WorldSyncConfig {
        WorldSyncConfig {
            index_url: self.world_sync_index_url.clone(),
            content_server_urls: vec![self.world_sync_content_server.clone()],
            interval: Duration::from_secs(self.world_sync_interval_secs),
            max_retries: self.world_sync_max_retries,
            retry_base_delay: Duration::from_millis(self.world_sync_retry_base_ms),
            ..WorldSyncConfig::default()
        }
    }
}

/// Bridge subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the bridge with its HTTP endpoints.
    Serve(ServeArgs),

    /// Run a single world sync pass and exit.
    WorldSyncOnce,
}

/// Options of the `serve` command.
#[derive(Debug, Clone, ClapArgs)]
pub struct ServeArgs {
    /// HTTP port.
    #[arg(long, env = "HERALD_PORT", default_value = "5000")]
    pub port: u16,

    /// Only deploy scenes with a pointer inside `minX,minY,maxX,maxY`.
    #[arg(long, env = "RECT_FILTER", value_parser = parse_rect_filter, allow_hyphen_values = true)]
    pub rect_filter: Option<RectFilter>,

    /// Deployment jobs running at once.
    #[arg(long, env = "HERALD_QUEUE_CONCURRENCY", default_value = "5")]
    pub queue_concurrency: usize,

    /// Seconds a deployment job may run.
    #[arg(long, env = "HERALD_QUEUE_TIMEOUT_SECS", default_value = "100")]
    pub queue_timeout_secs: u64,

    /// Queued jobs at which admission blocks.
    #[arg(
        long,
        env = "HERALD_MAX_QUEUE_SIZE",
        default_value = "1000",
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub max_queue_size: usize,

    /// Do not start the world sync loop.
    #[arg(long, env = "HERALD_DISABLE_WORLD_SYNC")]
    pub disable_world_sync: bool,

    /// Shared secret expected in the `Authorization` header of `/queue-task`.
    #[arg(long, env = "TMP_SECRET", hide_env_values = true)]
    pub queue_secret: Option<String>,
}

impl ServeArgs {
    /// Builds the job queue configuration.
    #[must_use]
    pub fn job_queue_config(&self) -> JobQueueConfig {
        JobQueueConfig {
            concurrency: self.queue_concurrency,
            timeout: Duration::from_secs(self.queue_timeout_secs),
        }
    }

    /// Builds the deployer configuration.
    #[must_use]
    pub fn deployer_config(&self) -> DeployerConfig {
        DeployerConfig {
            rect_filter: self.rect_filter,
            max_queue_size: self.max_queue_size,
        }
    }
}

fn parse_rect_filter(value: &str) -> Result<RectFilter, String> {
    value.parse().map_err(|e: herald_core::Error| e.to_string())
}
