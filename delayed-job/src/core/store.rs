use async_trait::async_trait;
use thiserror::Error;

use crate::core::config::WorkerId;
use crate::core::job::{Job, JobId, Lease, NewJob};
use crate::core::{DateTime, Duration};

/// Inclusive priority bounds. `None` on either side means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriorityRange {
    pub min: Option<i32>,
    pub max: Option<i32>,
}

impl PriorityRange {
    pub fn contains(&self, priority: i32) -> bool {
        self.min.map_or(true, |min| priority >= min) && self.max.map_or(true, |max| priority <= max)
    }
}

/// The availability predicate as seen by one worker at one instant.
///
/// A job is available when it has not permanently failed, is due, and is either unleased, leased
/// longer than `max_run_time` ago, or leased by this very worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub now: DateTime,
    /// Leases stamped before this instant are considered abandoned.
    pub expired_before: DateTime,
    pub worker: WorkerId,
    pub priority: PriorityRange,
}

impl Availability {
    pub fn new(
        now: DateTime,
        max_run_time: Duration,
        worker: WorkerId,
        priority: PriorityRange,
    ) -> Self {
        Self {
            now,
            expired_before: now
                .checked_sub_signed(max_run_time)
                .unwrap_or(DateTime::MIN_UTC),
            worker,
            priority,
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        let lease_ok = match &job.lease {
            None => true,
            Some(lease) => lease.locked_at < self.expired_before || lease.locked_by == self.worker,
        };
        job.failed_at.is_none()
            && job.run_at <= self.now
            && lease_ok
            && self.priority.contains(job.priority)
    }
}

/// Row filter of [`Store::conditional_update`]. It is evaluated by the store against the persisted
/// state at the moment of the write, never against a snapshot read earlier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Every row satisfying the availability predicate (batch claim).
    Available(Availability),
    /// A single due row that nobody holds a valid lease on.
    Unleased {
        id: JobId,
        now: DateTime,
        expired_before: DateTime,
    },
    /// A single row leased by `worker` (lease renewal).
    HeldBy { id: JobId, worker: WorkerId },
}

impl Predicate {
    pub fn matches(&self, job: &Job) -> bool {
        match self {
            Predicate::Available(availability) => availability.matches(job),
            Predicate::Unleased {
                id,
                now,
                expired_before,
            } => {
                job.id == *id
                    && job.run_at <= *now
                    && job
                        .locked_at()
                        .map_or(true, |locked_at| locked_at < *expired_before)
            }
            Predicate::HeldBy { id, worker } => job.id == *id && job.is_locked_by(worker),
        }
    }
}

/// Bounds the rows touched by a conditional update: skip `offset` matching rows, then take at most
/// `limit`. Rows are taken in storage order, not in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub limit: u32,
    pub offset: u64,
}

/// Shared persistence for jobs. All coordination between workers happens through the atomicity of
/// [`Store::conditional_update`]; implementations must not keep lease state in process.
///
/// For an example implementation look at `delayed_job_sqlite` crate.
#[async_trait]
pub trait Store: Send + Sync {
    /// Persist a new job. `run_at` defaults to now.
    async fn insert(&self, job: NewJob) -> Result<Job, QueueError>;

    async fn find(&self, id: JobId) -> Result<Option<Job>, QueueError>;

    /// Atomically set `lease` on the rows matching `predicate`, returning how many rows changed.
    /// `window` only applies to [`Predicate::Available`].
    async fn conditional_update(
        &self,
        predicate: &Predicate,
        lease: &Lease,
        window: Option<Window>,
    ) -> Result<u64, QueueError>;

    async fn count_available(&self, availability: &Availability) -> Result<u64, QueueError>;

    /// At most `limit` available jobs, most urgent and most overdue first. Does not lock anything.
    async fn select_available(
        &self,
        limit: u32,
        availability: &Availability,
    ) -> Result<Vec<Job>, QueueError>;

    /// Jobs currently leased with exactly this stamp and owner.
    async fn select_by_lock(
        &self,
        locked_at: DateTime,
        worker: &WorkerId,
    ) -> Result<Vec<Job>, QueueError>;

    /// Overwrite the persisted row with this snapshot.
    async fn save(&self, job: &Job) -> Result<(), QueueError>;

    /// Returns `false` if the row was already gone.
    async fn delete(&self, id: JobId) -> Result<bool, QueueError>;

    /// Release every lease held by `worker`, expired or not.
    async fn clear_locks(&self, worker: &WorkerId) -> Result<u64, QueueError>;

    async fn delete_all(&self) -> Result<u64, QueueError>;
}

/// Errors related to store and queue operation.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum QueueError {
    /// Encountered an error when tried to serialize the payload.
    #[error("Failed to serialize job payload")]
    EncodeError {
        #[from]
        source: bincode::error::EncodeError,
    },
    #[error("Job by that ID does not exist: {0}")]
    JobNotFound(JobId),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
