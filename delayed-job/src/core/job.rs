use crate::core::config::WorkerId;
use crate::core::store::Availability;
use crate::core::{Bytes, DateTime};

/// Store-assigned job identifier.
pub type JobId = i64;

/// Time-bounded exclusive claim on a job. A job either carries both the stamp and the owner or
/// neither of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub locked_at: DateTime,
    pub locked_by: WorkerId,
}

impl Lease {
    pub fn new(locked_at: DateTime, locked_by: WorkerId) -> Self {
        Self {
            locked_at,
            locked_by,
        }
    }
}

/// A job as it is persisted in the store. Instances held by a worker are a snapshot that is only
/// valid until the next interaction with the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    /// Higher is more urgent.
    pub priority: i32,
    /// How many times execution of this job has failed so far.
    pub attempts: u32,
    /// Encoded envelope, see [`crate::core::codec`].
    pub payload: Bytes,
    pub last_error: Option<String>,
    /// Earliest time the job may run.
    pub run_at: DateTime,
    pub lease: Option<Lease>,
    /// Set once the job has permanently failed. Such jobs are never selected again.
    pub failed_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Job {
    pub fn is_failed(&self) -> bool {
        self.failed_at.is_some()
    }

    pub fn locked_at(&self) -> Option<DateTime> {
        self.lease.as_ref().map(|l| l.locked_at)
    }

    pub fn locked_by(&self) -> Option<&WorkerId> {
        self.lease.as_ref().map(|l| &l.locked_by)
    }

    pub fn is_locked_by(&self, worker: &WorkerId) -> bool {
        self.locked_by() == Some(worker)
    }

    /// Whether the job satisfies the availability predicate.
    pub fn is_available(&self, availability: &Availability) -> bool {
        availability.matches(self)
    }

    /// Drop the lease from this snapshot. Nothing is written to the store.
    pub fn unlock(&mut self) {
        self.lease = None;
    }
}

/// A job that has not been inserted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub priority: i32,
    /// When `None`, the store uses the insertion time.
    pub run_at: Option<DateTime>,
    pub payload: Bytes,
}

impl NewJob {
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            priority: 0,
            run_at: None,
            payload: payload.into(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_run_at(mut self, run_at: DateTime) -> Self {
        self.run_at = Some(run_at);
        self
    }

    /// Materialize the row the way every store does on insert.
    pub fn into_job(self, id: JobId, now: DateTime) -> Job {
        Job {
            id,
            priority: self.priority,
            attempts: 0,
            payload: self.payload,
            last_error: None,
            run_at: self.run_at.unwrap_or(now),
            lease: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
