//! Bounded-concurrency job scheduling.
//!
//! This module provides:
//!
//! - [`JobScheduler`]: the admission contract the deployer depends on
//! - [`JobQueue`]: the production scheduler, a tokio-backed job runner
//!
//! ## Semantics
//!
//! - **Fire-and-forget**: `schedule_job` returns immediately; the job runs
//!   on its own task once a concurrency slot frees up
//! - **Bounded concurrency**: at most `concurrency` jobs run at once
//! - **Per-job timeout**: a job exceeding `timeout` is abandoned and logged
//! - **Backpressure**: `on_size_less_than(n)` suspends until fewer than `n`
//!   jobs are queued or running
//!
//! No ordering is guaranteed between jobs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::{Semaphore, watch};
use tracing::Instrument;

use crate::metrics;

/// A unit of work handed to a scheduler.
pub type Job = BoxFuture<'static, ()>;

/// Admission contract for scheduling deployment jobs.
#[async_trait]
pub trait JobScheduler: Send + Sync + 'static {
    /// Suspends until fewer than `max` jobs are queued or in flight.
    async fn on_size_less_than(&self, max: usize);

    /// Enqueues a job without waiting for it to run.
    fn schedule_job(&self, job: Job);

    /// Returns the number of jobs queued or in flight.
    fn size(&self) -> usize;
}

/// Configuration for [`JobQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobQueueConfig {
    /// Maximum jobs running at once.
    pub concurrency: usize,
    /// Maximum time a single job may run.
    pub timeout: Duration,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            timeout: Duration::from_secs(100),
        }
    }
}

/// Tokio-backed [`JobScheduler`].
///
/// ## Example
///
/// ```rust
/// use herald_bridge::scheduler::{JobQueue, JobQueueConfig, JobScheduler};
///
/// # #[tokio::main]
/// # async fn main() {
/// let queue = JobQueue::new("downloads", JobQueueConfig::default());
/// queue.schedule_job(Box::pin(async { /* work */ }));
/// queue.on_idle().await;
/// assert_eq!(queue.size(), 0);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct JobQueue {
    name: Arc<str>,
    config: JobQueueConfig,
    permits: Arc<Semaphore>,
    size: Arc<watch::Sender<usize>>,
}

impl JobQueue {
    /// Creates a new job queue.
    ///
    /// A concurrency of zero is raised to one.
    #[must_use]
    pub fn new(name: impl Into<String>, config: JobQueueConfig) -> Self {
        let concurrency = config.concurrency.max(1);
        let (size, _) = watch::channel(0);
        Self {
            name: Arc::from(name.into()),
            config: JobQueueConfig {
                concurrency,
                ..config
            },
            permits: Arc::new(Semaphore::new(concurrency)),
            size: Arc::new(size),
        }
    }

    /// Suspends until no job is queued or running.
    pub async fn on_idle(&self) {
        let mut size = self.size.subscribe();
        let _ = size.wait_for(|size| *size == 0).await;
    }
}

/// Decrements the queue size when a job finishes, panics included.
struct SizeGuard {
    queue: Arc<str>,
    size: Arc<watch::Sender<usize>>,
}

impl SizeGuard {
    fn enter(queue: Arc<str>, size: Arc<watch::Sender<usize>>) -> Self {
        size.send_modify(|size| *size += 1);
        metrics::set_job_queue_size(&queue, *size.borrow());
        Self { queue, size }
    }
}

impl Drop for SizeGuard {
    fn drop(&mut self) {
        self.size
            .send_modify(|size| *size = size.saturating_sub(1));
        metrics::set_job_queue_size(&self.queue, *self.size.borrow());
    }
}

#[async_trait]
impl JobScheduler for JobQueue {
    async fn on_size_less_than(&self, max: usize) {
        let mut size = self.size.subscribe();
        let _ = size.wait_for(|size| *size < max).await;
    }

    fn schedule_job(&self, job: Job) {
        let guard = SizeGuard::enter(Arc::clone(&self.name), Arc::clone(&self.size));
        let permits = Arc::clone(&self.permits);
        let timeout = self.config.timeout;
        let span = tracing::debug_span!("job", queue = %self.name);

        tokio::spawn(
            async move {
                let _guard = guard;
                let Ok(_permit) = permits.acquire_owned().await else {
                    tracing::error!("job queue closed before job could run");
                    return;
                };

                if tokio::time::timeout(timeout, job).await.is_err() {
                    tracing::warn!(
                        timeout_secs = timeout.as_secs(),
                        "job exceeded its timeout and was abandoned"
                    );
                }
            }
            .instrument(span),
        );
    }

    fn size(&self) -> usize {
        *self.size.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn runs_scheduled_jobs() {
        let queue = JobQueue::new("test", JobQueueConfig::default());
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let done = Arc::clone(&done);
            queue.schedule_job(Box::pin(async move {
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }

        queue.on_idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 10);
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn bounds_concurrency() {
        let queue = JobQueue::new(
            "test",
            JobQueueConfig {
                concurrency: 2,
                timeout: Duration::from_secs(5),
            },
        );
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            queue.schedule_job(Box::pin(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        assert_eq!(queue.size(), 8);
        queue.on_idle().await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn abandons_jobs_past_timeout() {
        let queue = JobQueue::new(
            "test",
            JobQueueConfig {
                concurrency: 1,
                timeout: Duration::from_secs(1),
            },
        );
        let finished = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&finished);

        queue.schedule_job(Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            flag.fetch_add(1, Ordering::SeqCst);
        }));

        queue.on_idle().await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn on_size_less_than_waits_for_capacity() {
        let queue = JobQueue::new(
            "test",
            JobQueueConfig {
                concurrency: 1,
                timeout: Duration::from_secs(5),
            },
        );
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        queue.schedule_job(Box::pin(async move {
            let _ = release_rx.await;
        }));
        assert_eq!(queue.size(), 1);

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.on_size_less_than(1).await })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        release_tx.send(()).expect("job still waiting");
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("capacity freed")
            .expect("waiter task");
        assert_eq!(queue.size(), 0);
    }
}
