use async_trait::async_trait;
use bincode::Encode;

use crate::core::codec;
use crate::core::config::WorkerId;
use crate::core::job::{Job, NewJob};
use crate::core::job_processor::JobProcessor;
use crate::core::store::{QueueError, Store};
use crate::core::{now, DateTime, Duration};

/// Producer and admin side of the queue. Implemented for every [`Store`].
///
/// ### Priority
///
/// When a job is enqueued one can specify priority. Jobs with higher priority get selected first
/// even if submitted after lower priority jobs. This is a selection preference, not a global
/// execution order.
#[async_trait]
pub trait Queue: Store {
    /// Enqueue a job to run at `run_at`, or as soon as possible when `None`.
    async fn enqueue_at<J>(
        &self,
        payload: J::Payload,
        priority: i32,
        run_at: Option<DateTime>,
    ) -> Result<Job, QueueError>
    where
        J: JobProcessor + 'static,
        J::Payload: Encode,
    {
        let payload = codec::encode::<J>(&payload)?;
        let mut job = NewJob::new(payload).with_priority(priority);
        if let Some(run_at) = run_at {
            job = job.with_run_at(run_at);
        }
        let job = self.insert(job).await?;
        tracing::debug!(jid = job.id, job_type = J::name(), priority, run_at = %job.run_at, "Enqueued job");
        Ok(job)
    }

    /// Enqueue a job to run next. Depending on queue backlog this may start running later than you expect.
    async fn enqueue<J>(&self, payload: J::Payload, priority: i32) -> Result<Job, QueueError>
    where
        J: JobProcessor + 'static,
        J::Payload: Encode,
    {
        self.enqueue_at::<J>(payload, priority, None).await
    }

    /// Enqueue a job to run at the future time relative to now.
    async fn enqueue_in<J>(
        &self,
        payload: J::Payload,
        run_in: Duration,
        priority: i32,
    ) -> Result<Job, QueueError>
    where
        J: JobProcessor + 'static,
        J::Payload: Encode,
    {
        let when = now()
            .checked_add_signed(run_in)
            .ok_or_else(|| anyhow::anyhow!("Run time out of range: now + {}", run_in))?;
        self.enqueue_at::<J>(payload, priority, Some(when)).await
    }

    /// Release every lease held by `worker`, e.g. after that worker died without cleaning up.
    async fn clear_all_locks_for(&self, worker: &WorkerId) -> Result<u64, QueueError> {
        let released = self.clear_locks(worker).await?;
        tracing::info!(worker = %worker, released, "Cleared locks");
        Ok(released)
    }

    /// Delete every job in the queue.
    async fn flush(&self) -> Result<u64, QueueError> {
        let deleted = self.delete_all().await?;
        tracing::warn!(deleted, "Flushed job queue");
        Ok(deleted)
    }
}

impl<S: Store> Queue for S {}
