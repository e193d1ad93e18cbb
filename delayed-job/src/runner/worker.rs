use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::hooks::{NoopHooks, WorkerHooks};
use super::job_router::RunnerRouter;
use super::lease::{LeaseManager, PROBE_CANDIDATES};
use super::outcome::{JobFailure, JobOutcome, Reservation, WorkOffStats};
use super::retry::RetryPolicy;
use crate::core::config::{ClaimStrategy, ConfigError, WorkerConfig, WorkerId};
use crate::core::job::Job;
use crate::core::job_processor::JobError;
use crate::core::store::{QueueError, Store};
use crate::core::Duration;

/// A worker: claims jobs from the store, runs them through the router and resolves the result.
///
/// Workers don't know about each other. Run as many as you like, in as many processes as you
/// like, against the same store; give each one its own [`WorkerId`].
///
/// ## Examples
/// See `delayed-job-sqlite` for examples.
pub struct Worker<S> {
    store: Arc<S>,
    leases: LeaseManager<S>,
    retry: RetryPolicy,
    router: Arc<RunnerRouter>,
    config: WorkerConfig,
    poll_interval: std::time::Duration,
    hooks: Arc<dyn WorkerHooks>,
}

impl<S> Worker<S>
where
    S: Store,
{
    /// Create a worker. The configuration is validated here so that bad values fail before the
    /// loop starts.
    pub fn new(
        store: Arc<S>,
        router: RunnerRouter,
        config: WorkerConfig,
    ) -> Result<Self, ConfigError> {
        let config = config.validate()?;
        let poll_interval = config
            .poll_interval
            .to_std()
            .map_err(|_| ConfigError::NonPositive("poll_interval"))?;
        Ok(Self {
            leases: LeaseManager::new(store.clone(), &config),
            retry: RetryPolicy::from_config(&config),
            store,
            router: Arc::new(router),
            config,
            poll_interval,
            hooks: Arc::new(NoopHooks),
        })
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn WorkerHooks>) -> Self {
        self.leases = self.leases.with_hooks(hooks.clone());
        self.hooks = hooks;
        self
    }

    pub fn worker_id(&self) -> &WorkerId {
        self.leases.worker()
    }

    pub fn leases(&self) -> &LeaseManager<S> {
        &self.leases
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run one job that this worker already holds the lease on.
    ///
    /// On success the job is deleted. Any failure (undecodable payload, error returned by the
    /// processor, panic, failure to delete) goes through the retry policy instead. Nothing escapes
    /// from here: store errors while rescheduling are logged and the lease is left to expire.
    #[instrument(skip_all, fields(jid = job.id, attempts = job.attempts, job_type))]
    pub async fn execute_one(&self, mut job: Job) -> JobOutcome {
        self.hooks.on_job_start(&job);
        let started = Instant::now();

        let failure = match self.invoke(&job).await {
            Ok(()) => match self.store.delete(job.id).await {
                Ok(_) => None,
                Err(e) => Some(JobFailure::from_error(&e)),
            },
            Err(e) => Some(JobFailure::from_error(&e)),
        };
        let elapsed = started.elapsed();

        let outcome = match failure {
            None => {
                tracing::info!(
                    "Job {} completed after {:.4}s",
                    job.id,
                    elapsed.as_secs_f64()
                );
                JobOutcome::Success { elapsed }
            }
            Some(failure) => {
                tracing::error!(
                    "Job {} failed with {} - {} failed attempts",
                    job.id,
                    failure.message,
                    job.attempts + 1
                );
                match self
                    .retry
                    .reschedule(self.store.as_ref(), &mut job, &failure, None)
                    .await
                {
                    Ok(resolution) => self.hooks.on_resolution(&job, &resolution),
                    Err(e) => tracing::error!("Failed to reschedule job {}: {}", job.id, e),
                }
                JobOutcome::Failure(failure)
            }
        };
        self.hooks.on_job_finish(&job, &outcome, elapsed);
        outcome
    }

    async fn invoke(&self, job: &Job) -> Result<(), JobError> {
        let invocation = self.router.decode(&job.payload)?;
        tracing::Span::current().record("job_type", invocation.type_id());
        AssertUnwindSafe(invocation.invoke(job.id))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(JobError::Panicked(panic_message(panic.as_ref()))))
    }

    /// Claim a batch and run it, in the order the store returned it.
    pub async fn claim_and_run(&self, batch_size: u32, max_run_time: Duration) -> Vec<JobOutcome> {
        let jobs = self.leases.claim(batch_size, max_run_time).await;
        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in jobs {
            outcomes.push(self.execute_one(job).await);
        }
        outcomes
    }

    /// Probe a few candidates and run the first one we manage to lock. Candidates locked by
    /// somebody else in the meantime are skipped rather than waited on.
    pub async fn reserve_and_run_one(
        &self,
        max_run_time: Duration,
    ) -> Result<Reservation, QueueError> {
        let candidates = self
            .leases
            .find_available(PROBE_CANDIDATES, max_run_time)
            .await?;
        for mut job in candidates {
            if self.leases.lock_exclusively(&mut job, max_run_time).await? {
                return Ok(Reservation::Ran(self.execute_one(job).await));
            }
            tracing::debug!("Job {} got locked by another worker, skipping", job.id);
        }
        Ok(Reservation::NoWorkAvailable)
    }

    /// Work off up to `total` jobs, `batch_size` at a time, using the configured claim strategy.
    /// Stops early when a batch comes back empty or `shutdown` is cancelled.
    pub async fn work_off(
        &self,
        total: u32,
        batch_size: u32,
        shutdown: &CancellationToken,
    ) -> WorkOffStats {
        let mut stats = WorkOffStats::default();
        let max_run_time = self.config.max_run_time;

        match self.config.strategy {
            ClaimStrategy::Batch => {
                let batch_size = batch_size.max(1);
                let batches = total.div_ceil(batch_size);
                for batch in 0..batches {
                    let limit = batch_size.min(total - batch * batch_size);
                    let outcomes = self.claim_and_run(limit, max_run_time).await;
                    for outcome in &outcomes {
                        stats.record(outcome);
                    }
                    if shutdown.is_cancelled() || outcomes.is_empty() {
                        break;
                    }
                }
            }
            ClaimStrategy::Probe => {
                for _ in 0..total {
                    match self.reserve_and_run_one(max_run_time).await {
                        Ok(Reservation::Ran(outcome)) => stats.record(&outcome),
                        Ok(Reservation::NoWorkAvailable) => break,
                        Err(e) => {
                            tracing::error!("Failed to reserve a job: {}", e);
                            break;
                        }
                    }
                    if shutdown.is_cancelled() {
                        break;
                    }
                }
            }
        }
        stats
    }

    /// Work until `shutdown` is cancelled, sleeping `poll_interval` whenever a pass found nothing.
    ///
    /// The token is only looked at between batches and while sleeping; a running job always
    /// finishes. On the way out every lease this worker holds is released, so nobody has to wait
    /// for them to expire.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<WorkOffStats, QueueError> {
        tracing::info!("Starting job worker {}", self.worker_id());
        let mut totals = WorkOffStats::default();

        loop {
            let started = Instant::now();
            let stats = self
                .work_off(self.config.work_off_total, self.config.batch_size, &shutdown)
                .await;
            totals.success += stats.success;
            totals.failure += stats.failure;

            if shutdown.is_cancelled() {
                break;
            }

            if stats.total() == 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            } else {
                let rate = stats.total() as f64 / started.elapsed().as_secs_f64().max(f64::EPSILON);
                tracing::info!(
                    "{} jobs processed at {:.4} j/s, {} failed ...",
                    stats.total(),
                    rate,
                    stats.failure
                );
            }
        }

        tracing::info!("Exiting job worker {}", self.worker_id());
        let released = self.leases.clear_locks().await?;
        if released > 0 {
            tracing::info!("Released {} locks", released);
        }
        Ok(totals)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::config::FailedJobRetention;
    use crate::core::job::{JobId, Lease, NewJob};
    use crate::core::job_processor::JobProcessor;
    use crate::core::memory::MemoryStore;
    use crate::core::queue::Queue;
    use crate::core::{now, DateTime};
    use crate::runner::outcome::Resolution;
    use async_trait::async_trait;
    use std::convert::Infallible;
    use crate::core::store::{Availability, Predicate, Window};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Succeed {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl JobProcessor for Succeed {
        type Payload = u32;
        type Error = Infallible;

        async fn handle(&self, _jid: JobId, _payload: u32) -> Result<(), Infallible> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name() -> &'static str {
            "succeed"
        }
    }

    struct AlwaysFail;

    #[async_trait]
    impl JobProcessor for AlwaysFail {
        type Payload = String;
        type Error = anyhow::Error;

        async fn handle(&self, _jid: JobId, payload: String) -> Result<(), anyhow::Error> {
            Err(anyhow::anyhow!("cannot deliver to {}", payload))
        }

        fn name() -> &'static str {
            "always_fail"
        }
    }

    struct Panics;

    #[async_trait]
    impl JobProcessor for Panics {
        type Payload = ();
        type Error = Infallible;

        async fn handle(&self, _jid: JobId, _payload: ()) -> Result<(), Infallible> {
            panic!("boom");
        }

        fn name() -> &'static str {
            "panics"
        }
    }

    struct Unregistered;

    #[async_trait]
    impl JobProcessor for Unregistered {
        type Payload = ();
        type Error = Infallible;

        async fn handle(&self, _jid: JobId, _payload: ()) -> Result<(), Infallible> {
            Ok(())
        }

        fn name() -> &'static str {
            "unregistered"
        }
    }

    #[derive(Default)]
    struct Recorder {
        resolutions: Mutex<Vec<Resolution>>,
        finished: AtomicUsize,
        released: AtomicUsize,
    }

    impl WorkerHooks for Recorder {
        fn on_job_finish(&self, _job: &Job, _outcome: &JobOutcome, _elapsed: std::time::Duration) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }

        fn on_resolution(&self, _job: &Job, resolution: &Resolution) {
            self.resolutions.lock().unwrap().push(*resolution);
        }

        fn on_clear_locks(&self, _worker: &WorkerId, released: u64) {
            self.released.fetch_add(released as usize, Ordering::SeqCst);
        }
    }

    fn config() -> WorkerConfig {
        WorkerConfig::default().with_worker_id("test-worker")
    }

    fn worker_with(
        store: &Arc<MemoryStore>,
        config: WorkerConfig,
    ) -> (Worker<MemoryStore>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut router = RunnerRouter::default();
        router.add_job_handler(Succeed { runs: runs.clone() });
        router.add_job_handler(AlwaysFail);
        router.add_job_handler(Panics);
        let worker = Worker::new(store.clone(), router, config).unwrap();
        (worker, runs)
    }

    fn worker(store: &Arc<MemoryStore>) -> (Worker<MemoryStore>, Arc<AtomicUsize>) {
        worker_with(store, config())
    }

    async fn make_due(store: &MemoryStore, id: JobId) {
        let mut job = store.find(id).await.unwrap().unwrap();
        job.run_at = now() - chrono::Duration::seconds(1);
        store.save(&job).await.unwrap();
    }

    #[tokio::test]
    async fn successful_job_is_deleted() {
        let store = Arc::new(MemoryStore::new());
        let (worker, runs) = worker(&store);
        let job = store.enqueue::<Succeed>(1, 0).await.unwrap();

        let stats = worker.work_off(1, 1, &CancellationToken::new()).await;
        assert_eq!(stats, WorkOffStats { success: 1, failure: 0 });
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(store.find(job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_job_is_rescheduled() {
        let store = Arc::new(MemoryStore::new());
        let (worker, _) = worker(&store);
        let job = store
            .enqueue::<AlwaysFail>("ops@example.com".to_string(), 0)
            .await
            .unwrap();

        let before = now();
        let stats = worker.work_off(1, 1, &CancellationToken::new()).await;
        assert_eq!(stats, WorkOffStats { success: 0, failure: 1 });

        let stored = store.find(job.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 1);
        assert!(stored.lease.is_none());
        assert!(stored.run_at >= before + chrono::Duration::seconds(6));
        assert!(stored
            .last_error
            .unwrap()
            .starts_with("cannot deliver to ops@example.com"));
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let store = Arc::new(MemoryStore::new());
        let (worker, _) = worker(&store);
        let job = store.enqueue::<Panics>((), 0).await.unwrap();
        let mut claimed = worker.leases().claim(1, chrono::Duration::minutes(15)).await;
        assert_eq!(claimed.len(), 1);

        let outcome = worker.execute_one(claimed.remove(0)).await;
        let JobOutcome::Failure(failure) = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert_eq!(failure.message, "Job panicked: boom");
        assert_eq!(store.find(job.id).await.unwrap().unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn unknown_job_type_consumes_an_attempt() {
        let store = Arc::new(MemoryStore::new());
        let (worker, _) = worker(&store);
        let job = store.enqueue::<Unregistered>((), 0).await.unwrap();

        let stats = worker.work_off(1, 1, &CancellationToken::new()).await;
        assert_eq!(stats.failure, 1);
        let stored = store.find(job.id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 1);
        assert!(stored
            .last_error
            .unwrap()
            .contains("not configured to run this job type: unregistered"));
    }

    #[tokio::test]
    async fn always_failing_job_is_discarded_after_max_attempts() {
        let store = Arc::new(MemoryStore::new());
        let recorder = Arc::new(Recorder::default());
        let (worker, _) = worker(&store);
        let worker = worker.with_hooks(recorder.clone());
        let job = store
            .enqueue::<AlwaysFail>("nobody".to_string(), 0)
            .await
            .unwrap();
        let token = CancellationToken::new();

        for _ in 0..25 {
            let stats = worker.work_off(1, 1, &token).await;
            assert_eq!(stats, WorkOffStats { success: 0, failure: 1 });
            if store.find(job.id).await.unwrap().is_some() {
                make_due(&store, job.id).await;
            }
        }

        assert!(store.find(job.id).await.unwrap().is_none());
        assert_eq!(worker.work_off(1, 1, &token).await.total(), 0);
        let resolutions = recorder.resolutions.lock().unwrap();
        assert_eq!(resolutions.len(), 25);
        assert_eq!(resolutions.last(), Some(&Resolution::Discarded));
        assert_eq!(recorder.finished.load(Ordering::SeqCst), 25);
    }

    #[tokio::test]
    async fn always_failing_job_is_kept_when_configured() {
        let store = Arc::new(MemoryStore::new());
        let (worker, _) = worker_with(
            &store,
            config()
                .with_max_attempts(3)
                .with_failed_job_retention(FailedJobRetention::Keep),
        );
        let job = store
            .enqueue::<AlwaysFail>("nobody".to_string(), 0)
            .await
            .unwrap();
        let token = CancellationToken::new();

        for _ in 0..3 {
            assert_eq!(worker.work_off(1, 1, &token).await.failure, 1);
            make_due(&store, job.id).await;
        }

        let stored = store.find(job.id).await.unwrap().unwrap();
        assert!(stored.is_failed());
        assert!(stored.lease.is_none());
        assert_eq!(worker.work_off(1, 1, &token).await.total(), 0);
    }

    #[tokio::test]
    async fn work_off_runs_batches_until_empty() {
        let store = Arc::new(MemoryStore::new());
        let (worker, runs) = worker(&store);
        for i in 0..7 {
            store.enqueue::<Succeed>(i, 0).await.unwrap();
        }

        let stats = worker.work_off(100, 3, &CancellationToken::new()).await;
        assert_eq!(stats, WorkOffStats { success: 7, failure: 0 });
        assert_eq!(runs.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn work_off_never_exceeds_total() {
        let store = Arc::new(MemoryStore::new());
        let (worker, _) = worker(&store);
        for i in 0..10 {
            store.enqueue::<Succeed>(i, 0).await.unwrap();
        }

        let stats = worker.work_off(5, 3, &CancellationToken::new()).await;
        assert_eq!(stats.success, 5);
        assert_eq!(store.jobs().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn work_off_stops_after_current_batch_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let (worker, _) = worker(&store);
        for i in 0..10 {
            store.enqueue::<Succeed>(i, 0).await.unwrap();
        }
        let token = CancellationToken::new();
        token.cancel();

        let stats = worker.work_off(10, 2, &token).await;
        assert_eq!(stats.success, 2);
    }

    #[tokio::test]
    async fn probe_strategy_runs_jobs_one_by_one() {
        let store = Arc::new(MemoryStore::new());
        let (worker, runs) = worker_with(&store, config().with_strategy(ClaimStrategy::Probe));
        for i in 0..4 {
            store.enqueue::<Succeed>(i, 0).await.unwrap();
        }

        let stats = worker.work_off(100, 25, &CancellationToken::new()).await;
        assert_eq!(stats.success, 4);
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn reserve_reports_no_work() {
        let store = Arc::new(MemoryStore::new());
        let (worker, _) = worker(&store);
        let reservation = worker
            .reserve_and_run_one(chrono::Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(reservation, Reservation::NoWorkAvailable);

        // Leased by someone else and not expired: still nothing for us.
        let mut job = store.enqueue::<Succeed>(1, 0).await.unwrap();
        job.lease = Some(Lease::new(now(), WorkerId::from("other")));
        store.save(&job).await.unwrap();
        let reservation = worker
            .reserve_and_run_one(chrono::Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(reservation, Reservation::NoWorkAvailable);
    }

    /// Hands out candidates, then lets worker "other" lease the first one before we get to it.
    struct ContendedStore {
        inner: MemoryStore,
        contended: AtomicBool,
    }

    #[async_trait]
    impl Store for ContendedStore {
        async fn insert(&self, job: NewJob) -> Result<Job, QueueError> {
            self.inner.insert(job).await
        }
        async fn find(&self, id: JobId) -> Result<Option<Job>, QueueError> {
            self.inner.find(id).await
        }
        async fn conditional_update(
            &self,
            predicate: &Predicate,
            lease: &Lease,
            window: Option<Window>,
        ) -> Result<u64, QueueError> {
            self.inner
                .conditional_update(predicate, lease, window)
                .await
        }
        async fn count_available(&self, a: &Availability) -> Result<u64, QueueError> {
            self.inner.count_available(a).await
        }
        async fn select_available(
            &self,
            limit: u32,
            a: &Availability,
        ) -> Result<Vec<Job>, QueueError> {
            let candidates = self.inner.select_available(limit, a).await?;
            if let Some(first) = candidates.first() {
                if !self.contended.swap(true, Ordering::SeqCst) {
                    let mut taken = first.clone();
                    taken.lease = Some(Lease::new(now(), WorkerId::from("other")));
                    self.inner.save(&taken).await?;
                }
            }
            Ok(candidates)
        }
        async fn select_by_lock(
            &self,
            locked_at: DateTime,
            worker: &WorkerId,
        ) -> Result<Vec<Job>, QueueError> {
            self.inner.select_by_lock(locked_at, worker).await
        }
        async fn save(&self, job: &Job) -> Result<(), QueueError> {
            self.inner.save(job).await
        }
        async fn delete(&self, id: JobId) -> Result<bool, QueueError> {
            self.inner.delete(id).await
        }
        async fn clear_locks(&self, worker: &WorkerId) -> Result<u64, QueueError> {
            self.inner.clear_locks(worker).await
        }
        async fn delete_all(&self) -> Result<u64, QueueError> {
            self.inner.delete_all().await
        }
    }

    #[tokio::test]
    async fn reserve_skips_candidate_locked_by_another_worker() {
        let store = Arc::new(ContendedStore {
            inner: MemoryStore::new(),
            contended: AtomicBool::new(false),
        });
        let runs = Arc::new(AtomicUsize::new(0));
        let mut router = RunnerRouter::default();
        router.add_job_handler(Succeed { runs: runs.clone() });
        let worker = Worker::new(store.clone(), router, config()).unwrap();

        let past: DateTime = now() - chrono::Duration::seconds(1);
        let first = store.enqueue_at::<Succeed>(1, 10, Some(past)).await.unwrap();
        let second = store.enqueue_at::<Succeed>(2, 5, Some(past)).await.unwrap();

        let reservation = worker
            .reserve_and_run_one(chrono::Duration::minutes(15))
            .await
            .unwrap();
        assert!(matches!(reservation, Reservation::Ran(JobOutcome::Success { .. })));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(store.find(second.id).await.unwrap().is_none());

        let untouched = store.find(first.id).await.unwrap().unwrap();
        assert!(untouched.is_locked_by(&WorkerId::from("other")));
        assert_eq!(untouched.attempts, 0);
        assert!(untouched.last_error.is_none());
    }

    #[tokio::test]
    async fn reserve_runs_most_urgent_job() {
        let store = Arc::new(MemoryStore::new());
        let (worker, _) = worker(&store);
        let past: DateTime = now() - chrono::Duration::seconds(1);
        let low = store.enqueue_at::<Succeed>(1, 5, Some(past)).await.unwrap();
        let high = store.enqueue_at::<Succeed>(2, 10, Some(past)).await.unwrap();

        let reservation = worker
            .reserve_and_run_one(chrono::Duration::minutes(15))
            .await
            .unwrap();
        assert!(matches!(reservation, Reservation::Ran(JobOutcome::Success { .. })));
        assert!(store.find(high.id).await.unwrap().is_none());
        assert!(store.find(low.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn run_releases_locks_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let recorder = Arc::new(Recorder::default());
        let (worker, runs) = worker(&store);
        let worker = worker.with_hooks(recorder.clone());
        for i in 0..3 {
            store.enqueue::<Succeed>(i, 0).await.unwrap();
        }
        // A lease we still hold from before a crash, on a job that isn't due yet.
        let mut held = store
            .enqueue_in::<Succeed>(9, chrono::Duration::hours(1), 0)
            .await
            .unwrap();
        // Stamped earlier than the claim, so its read-back doesn't pick this row up.
        held.lease = Some(Lease::new(
            now() - chrono::Duration::seconds(1),
            worker.worker_id().clone(),
        ));
        store.save(&held).await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let totals = worker.run(token).await.unwrap();

        assert_eq!(totals.success, 3);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(store.find(held.id).await.unwrap().unwrap().lease.is_none());
        assert_eq!(recorder.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_sleeps_when_idle_until_cancelled() {
        let store = Arc::new(MemoryStore::new());
        let (worker, runs) = worker(&store);
        let token = CancellationToken::new();

        let stopper = {
            let token = token.clone();
            let store = store.clone();
            async move {
                tokio::time::sleep(std::time::Duration::from_secs(12)).await;
                store.enqueue::<Succeed>(1, 0).await.unwrap();
                tokio::time::sleep(std::time::Duration::from_secs(6)).await;
                token.cancel();
            }
        };
        let (totals, ()) = tokio::join!(worker.run(token.clone()), stopper);

        assert_eq!(totals.unwrap().success, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalid_config_fails_at_construction() {
        let store = Arc::new(MemoryStore::new());
        let result = Worker::new(
            store,
            RunnerRouter::default(),
            config().with_poll_interval(chrono::Duration::zero()),
        );
        assert!(matches!(
            result,
            Err(ConfigError::NonPositive("poll_interval"))
        ));
    }
}
