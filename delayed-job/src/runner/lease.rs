use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use tracing::instrument;

use crate::core::config::{WorkerConfig, WorkerId};
use crate::core::job::{Job, Lease};
use crate::core::store::{Availability, Predicate, PriorityRange, QueueError, Store, Window};
use crate::core::{now, DateTime, Duration};
use crate::runner::hooks::{NoopHooks, WorkerHooks};

/// Jobs read by `find_available` when probing.
pub const PROBE_CANDIDATES: u32 = 5;

/// Selection, claiming and lease renewal for one worker identity.
///
/// Nothing here is shared between workers except the store. Every lease acquisition is a
/// conditional update whose predicate re-checks the lease state at write time, so two workers can
/// never both acquire the same job.
pub struct LeaseManager<S> {
    store: Arc<S>,
    worker: WorkerId,
    priority: PriorityRange,
    claim_retries: u32,
    claim_retry_pause: Duration,
    hooks: Arc<dyn WorkerHooks>,
}

impl<S> LeaseManager<S>
where
    S: Store,
{
    pub fn new(store: Arc<S>, config: &WorkerConfig) -> Self {
        Self {
            store,
            worker: config.worker_id.clone(),
            priority: config.priority,
            claim_retries: config.claim_retries,
            claim_retry_pause: config.claim_retry_pause,
            hooks: Arc::new(NoopHooks),
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn WorkerHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn worker(&self) -> &WorkerId {
        &self.worker
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn availability(&self, now: DateTime, max_run_time: Duration) -> Availability {
        Availability::new(now, max_run_time, self.worker.clone(), self.priority)
    }

    /// A few available jobs, most urgent first. Nothing gets locked, so some of them may be taken
    /// by other workers by the time we try to lock them.
    #[instrument(skip(self), err, fields(worker = %self.worker))]
    pub async fn find_available(
        &self,
        limit: u32,
        max_run_time: Duration,
    ) -> Result<Vec<Job>, QueueError> {
        let availability = self.availability(now(), max_run_time);
        self.store.select_available(limit, &availability).await
    }

    /// Lock up to `limit` available jobs with a single conditional update, then read back what got
    /// locked.
    ///
    /// The locked rows start at a random offset inside the available set. Workers racing over the
    /// same small set then tend to grab different rows. This is a contention heuristic only: the
    /// rows are not taken in priority order, and low priority jobs may be claimed before urgent
    /// ones.
    ///
    /// The read-back selects every row leased by this worker with the claim's millisecond stamp.
    /// A lease of ours stamped in that same millisecond by another call is returned as well,
    /// whether the row is due or not.
    ///
    /// Store errors during locking are retried `claim_retries` times with a fixed pause, after which
    /// the claim gives up and returns nothing. This never fails.
    #[instrument(skip(self), fields(worker = %self.worker, claimed))]
    pub async fn claim(&self, limit: u32, max_run_time: Duration) -> Vec<Job> {
        let started = Instant::now();
        let now = now();
        let availability = self.availability(now, max_run_time);
        let lease = Lease::new(now, self.worker.clone());

        let mut tries = 0;
        let affected = loop {
            match self.lock_window(&availability, &lease, limit).await {
                Ok(affected) => break affected,
                Err(e) => {
                    tries += 1;
                    tracing::error!("Failed to lock jobs: {}", e);
                    if tries > self.claim_retries {
                        tracing::warn!("Giving up locking jobs after {} attempts", tries);
                        break 0;
                    }
                    tracing::warn!("Retrying locking of jobs ({}/{})", tries, self.claim_retries);
                    if let Ok(pause) = self.claim_retry_pause.to_std() {
                        tokio::time::sleep(pause).await;
                    }
                }
            }
        };

        let jobs = if affected > 0 {
            match self.store.select_by_lock(now, &self.worker).await {
                Ok(jobs) => jobs,
                Err(e) => {
                    // The leases stay ours and come back on the next claim.
                    tracing::error!("Failed to read locked jobs back: {}", e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        tracing::Span::current().record("claimed", jobs.len());
        self.hooks
            .on_claim(&self.worker, jobs.len(), started.elapsed());
        jobs
    }

    async fn lock_window(
        &self,
        availability: &Availability,
        lease: &Lease,
        limit: u32,
    ) -> Result<u64, QueueError> {
        let available = self.store.count_available(availability).await?;
        if available == 0 {
            return Ok(0);
        }
        let spread = available.saturating_sub(u64::from(limit));
        let offset = if spread == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=spread)
        };
        self.store
            .conditional_update(
                &Predicate::Available(availability.clone()),
                lease,
                Some(Window { limit, offset }),
            )
            .await
    }

    /// Lock a single job for this worker, or renew the lease if we already hold it.
    ///
    /// Renewal lets a worker that crashed and restarted under the same identity pick its own jobs
    /// back up without waiting for the lease to expire. On success the snapshot's lease is updated
    /// to match the store.
    #[instrument(skip_all, err, fields(worker = %self.worker, jid = job.id))]
    pub async fn lock_exclusively(
        &self,
        job: &mut Job,
        max_run_time: Duration,
    ) -> Result<bool, QueueError> {
        let now = now();
        let predicate = if job.is_locked_by(&self.worker) {
            Predicate::HeldBy {
                id: job.id,
                worker: self.worker.clone(),
            }
        } else {
            Predicate::Unleased {
                id: job.id,
                now,
                expired_before: now
                    .checked_sub_signed(max_run_time)
                    .unwrap_or(DateTime::MIN_UTC),
            }
        };
        let lease = Lease::new(now, self.worker.clone());
        let affected = self
            .store
            .conditional_update(&predicate, &lease, None)
            .await?;
        if affected == 1 {
            job.lease = Some(lease);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Drop the lease from the snapshot without touching the store. The caller persists it along
    /// with its other changes.
    pub fn unlock(&self, job: &mut Job) {
        job.unlock();
    }

    /// Release every lease this worker holds, expired or not.
    #[instrument(skip(self), err, fields(worker = %self.worker))]
    pub async fn clear_locks(&self) -> Result<u64, QueueError> {
        let released = self.store.clear_locks(&self.worker).await?;
        self.hooks.on_clear_locks(&self.worker, released);
        Ok(released)
    }
}
