//! Scheduler double with test-controlled capacity.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use herald_bridge::JobScheduler;
use herald_bridge::scheduler::Job;
use tokio::sync::watch;

/// [`JobScheduler`] that holds jobs until the test runs them.
///
/// The reported size is set by the test through [`ScriptedScheduler::set_size`],
/// simulating the in-flight count of a real queue.
#[derive(Clone)]
pub struct ScriptedScheduler {
    size: Arc<watch::Sender<usize>>,
    jobs: Arc<Mutex<Vec<Job>>>,
    scheduled: Arc<Mutex<usize>>,
}

impl std::fmt::Debug for ScriptedScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedScheduler")
            .field("size", &*self.size.borrow())
            .field("scheduled", &self.scheduled())
            .finish_non_exhaustive()
    }
}

impl Default for ScriptedScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedScheduler {
    /// Creates a scheduler reporting size zero.
    pub fn new() -> Self {
        let (size, _) = watch::channel(0);
        Self {
            size: Arc::new(size),
            jobs: Arc::default(),
            scheduled: Arc::default(),
        }
    }

    /// Sets the size reported to admission.
    pub fn set_size(&self, size: usize) {
        self.size.send_replace(size);
    }

    /// Returns the number of jobs scheduled so far.
    pub fn scheduled(&self) -> usize {
        *self.scheduled.lock().expect("lock")
    }

    /// Runs pending jobs in scheduling order and returns how many ran.
    pub async fn run_pending(&self) -> usize {
        let jobs = std::mem::take(&mut *self.jobs.lock().expect("lock"));
        let count = jobs.len();
        for job in jobs {
            job.await;
        }
        count
    }
}

#[async_trait]
impl JobScheduler for ScriptedScheduler {
    async fn on_size_less_than(&self, max: usize) {
        let mut size = self.size.subscribe();
        let _ = size.wait_for(|size| *size < max).await;
    }

    fn schedule_job(&self, job: Job) {
        self.jobs.lock().expect("lock").push(job);
        *self.scheduled.lock().expect("lock") += 1;
    }

    fn size(&self) -> usize {
        *self.size.borrow()
    }
}
