use tracing::instrument;

use crate::core::config::{FailedJobRetention, WorkerConfig};
use crate::core::job::Job;
use crate::core::store::{QueueError, Store};
use crate::core::{now, DateTime, Duration};
use crate::runner::outcome::{JobFailure, Resolution};

/// Backoff and permanent failure decisions for failed jobs.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    retention: FailedJobRetention,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, retention: FailedJobRetention) -> Self {
        Self {
            max_attempts,
            retention,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.max_attempts, config.failed_job_retention)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the next run: `attempts^4 + 5` seconds, saturating at [`Duration::MAX`].
    pub fn backoff(attempts: u32) -> Duration {
        let attempts = i64::from(attempts);
        Duration::try_seconds(attempts.saturating_pow(4).saturating_add(5)).unwrap_or(Duration::MAX)
    }

    /// Record a failure on the job and either push it back with a backoff or resolve it for good.
    ///
    /// The lease is cleared in the same write. `run_at` overrides the computed backoff.
    #[instrument(skip_all, err, fields(jid = job.id, attempts = job.attempts))]
    pub async fn reschedule<S>(
        &self,
        store: &S,
        job: &mut Job,
        failure: &JobFailure,
        run_at: Option<DateTime>,
    ) -> Result<Resolution, QueueError>
    where
        S: Store + ?Sized,
    {
        let now = now();
        let attempts = job.attempts.saturating_add(1);
        job.attempts = attempts;
        job.last_error = Some(failure.last_error());
        job.unlock();

        if attempts < self.max_attempts {
            let run_at = run_at.unwrap_or_else(|| {
                now.checked_add_signed(Self::backoff(attempts))
                    .unwrap_or(DateTime::MAX_UTC)
            });
            job.run_at = run_at;
            store.save(job).await?;
            return Ok(Resolution::Retry { run_at, attempts });
        }

        match self.retention {
            FailedJobRetention::Discard => {
                tracing::info!(
                    "PERMANENTLY removing job {} because of {} consecutive failures",
                    job.id,
                    attempts
                );
                store.delete(job.id).await?;
                Ok(Resolution::Discarded)
            }
            FailedJobRetention::Keep => {
                tracing::info!(
                    "PERMANENTLY failing job {} because of {} consecutive failures",
                    job.id,
                    attempts
                );
                job.failed_at = Some(now);
                store.save(job).await?;
                Ok(Resolution::MarkedFailed)
            }
        }
    }
}
