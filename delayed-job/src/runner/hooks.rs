use std::time::Duration;

use crate::core::config::WorkerId;
use crate::core::job::Job;
use crate::runner::outcome::{JobOutcome, Resolution};

/// Observability callbacks for the lease manager and the worker. Every method defaults to doing
/// nothing; implement the ones you want to turn into metrics.
pub trait WorkerHooks: Send + Sync {
    /// A batch claim finished, `claimed` jobs were locked.
    fn on_claim(&self, _worker: &WorkerId, _claimed: usize, _elapsed: Duration) {}

    fn on_job_start(&self, _job: &Job) {}

    fn on_job_finish(&self, _job: &Job, _outcome: &JobOutcome, _elapsed: Duration) {}

    /// The retry policy resolved a failed job.
    fn on_resolution(&self, _job: &Job, _resolution: &Resolution) {}

    fn on_clear_locks(&self, _worker: &WorkerId, _released: u64) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl WorkerHooks for NoopHooks {}
