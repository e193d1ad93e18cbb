use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::core::config::WorkerId;
use crate::core::job::{Job, JobId, Lease, NewJob};
use crate::core::store::{Availability, Predicate, QueueError, Store, Window};
use crate::core::{now, DateTime};

#[derive(Debug, Default)]
struct Inner {
    next_id: JobId,
    jobs: BTreeMap<JobId, Job>,
}

/// A [`Store`] kept in process memory. Clones share the same jobs, so several workers in one
/// process can coordinate through it the same way they would through a database. Nothing is
/// durable.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, QueueError> {
        self.inner
            .lock()
            .map_err(|_| anyhow::anyhow!("Lock is poisoned").into())
    }

    /// Snapshot of every job, in insertion order.
    pub fn jobs(&self) -> Result<Vec<Job>, QueueError> {
        Ok(self.lock()?.jobs.values().cloned().collect())
    }
}

fn by_urgency(a: &Job, b: &Job) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.run_at.cmp(&b.run_at))
        .then(a.id.cmp(&b.id))
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert(&self, job: NewJob) -> Result<Job, QueueError> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let job = job.into_job(inner.next_id, now());
        inner.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        Ok(self.lock()?.jobs.get(&id).cloned())
    }

    async fn conditional_update(
        &self,
        predicate: &Predicate,
        lease: &Lease,
        window: Option<Window>,
    ) -> Result<u64, QueueError> {
        let mut inner = self.lock()?;
        let (skip, take) = match (predicate, window) {
            (Predicate::Available(_), Some(w)) => (w.offset as usize, w.limit as usize),
            _ => (0, usize::MAX),
        };
        let mut affected = 0;
        for job in inner
            .jobs
            .values_mut()
            .filter(|job| predicate.matches(job))
            .skip(skip)
            .take(take)
        {
            job.lease = Some(lease.clone());
            job.updated_at = lease.locked_at;
            affected += 1;
        }
        Ok(affected)
    }

    async fn count_available(&self, availability: &Availability) -> Result<u64, QueueError> {
        let inner = self.lock()?;
        Ok(inner
            .jobs
            .values()
            .filter(|job| availability.matches(job))
            .count() as u64)
    }

    async fn select_available(
        &self,
        limit: u32,
        availability: &Availability,
    ) -> Result<Vec<Job>, QueueError> {
        let inner = self.lock()?;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| availability.matches(job))
            .cloned()
            .collect();
        jobs.sort_by(by_urgency);
        jobs.truncate(limit as usize);
        Ok(jobs)
    }

    async fn select_by_lock(
        &self,
        locked_at: DateTime,
        worker: &WorkerId,
    ) -> Result<Vec<Job>, QueueError> {
        let inner = self.lock()?;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| job.locked_at() == Some(locked_at) && job.is_locked_by(worker))
            .cloned()
            .collect();
        jobs.sort_by(by_urgency);
        Ok(jobs)
    }

    async fn save(&self, job: &Job) -> Result<(), QueueError> {
        let mut inner = self.lock()?;
        let stored = inner
            .jobs
            .get_mut(&job.id)
            .ok_or(QueueError::JobNotFound(job.id))?;
        *stored = job.clone();
        stored.updated_at = now();
        Ok(())
    }

    async fn delete(&self, id: JobId) -> Result<bool, QueueError> {
        Ok(self.lock()?.jobs.remove(&id).is_some())
    }

    async fn clear_locks(&self, worker: &WorkerId) -> Result<u64, QueueError> {
        let mut inner = self.lock()?;
        let mut released = 0;
        for job in inner.jobs.values_mut().filter(|job| job.is_locked_by(worker)) {
            job.unlock();
            released += 1;
        }
        Ok(released)
    }

    async fn delete_all(&self) -> Result<u64, QueueError> {
        let mut inner = self.lock()?;
        let deleted = inner.jobs.len() as u64;
        inner.jobs.clear();
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::PriorityRange;
    use crate::core::Duration;

    fn availability(worker: &str) -> Availability {
        Availability::new(
            now(),
            Duration::minutes(15),
            WorkerId::from(worker),
            PriorityRange::default(),
        )
    }

    #[tokio::test]
    async fn selects_most_urgent_first() {
        let store = MemoryStore::new();
        let past = now() - Duration::seconds(1);
        let low = store
            .insert(NewJob::new(vec![1u8]).with_priority(5).with_run_at(past))
            .await
            .unwrap();
        let high = store
            .insert(NewJob::new(vec![2u8]).with_priority(10).with_run_at(past))
            .await
            .unwrap();

        let jobs = store.select_available(5, &availability("a")).await.unwrap();
        let ids: Vec<JobId> = jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![high.id, low.id]);
    }

    #[tokio::test]
    async fn window_limits_conditional_update() {
        let store = MemoryStore::new();
        for _ in 0..5 {
            store.insert(NewJob::new(vec![0u8])).await.unwrap();
        }
        let availability = availability("a");
        let lease = Lease::new(availability.now, availability.worker.clone());
        let affected = store
            .conditional_update(
                &Predicate::Available(availability.clone()),
                &lease,
                Some(Window {
                    limit: 2,
                    offset: 1,
                }),
            )
            .await
            .unwrap();
        assert_eq!(affected, 2);

        let locked = store
            .select_by_lock(lease.locked_at, &lease.locked_by)
            .await
            .unwrap();
        let ids: Vec<JobId> = locked.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn save_of_deleted_job_is_not_found() {
        let store = MemoryStore::new();
        let job = store.insert(NewJob::new(vec![0u8])).await.unwrap();
        assert!(store.delete(job.id).await.unwrap());
        assert!(!store.delete(job.id).await.unwrap());
        assert!(matches!(
            store.save(&job).await,
            Err(QueueError::JobNotFound(_))
        ));
    }
}
