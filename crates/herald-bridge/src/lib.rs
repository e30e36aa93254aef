//! # herald-bridge
//!
//! Deployment admission and notification fan-out.
//!
//! - [`deployer`]: filters, deduplicates and schedules entity deployments
//! - [`world_sync`]: periodic reconciliation of world scenes
//! - [`publish`]: pub/sub notification publishers
//! - [`scheduler`]: bounded-concurrency job queue with backpressure
//! - [`server`]: HTTP routes
//! - [`config`]: command line and environment configuration
//! - [`metrics`]: Prometheus metrics

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod config;
pub mod deployer;
pub mod metrics;
pub mod publish;
pub mod scheduler;
pub mod server;
pub mod world_sync;

pub use deployer::{Deployer, DeployerConfig, EntityDeployer, Topics};
pub use publish::{InMemoryPublisher, PubSubConfig, PubSubPublisher, PublishReceipt, Publisher};
pub use scheduler::{JobQueue, JobQueueConfig, JobScheduler};
pub use world_sync::{WorldSync, WorldSyncConfig, WorldSyncState};
