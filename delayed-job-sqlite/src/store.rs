use crate::types::{to_millis, JobRow};
use anyhow::Context;
use async_trait::async_trait;
use delayed_job::core::config::WorkerId;
use delayed_job::core::job::{Job, JobId, Lease, NewJob};
use delayed_job::core::store::{Availability, Predicate, QueueError, Store, Window};
use delayed_job::core::{now, DateTime};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::instrument;

const URGENCY_ORDER: &str = " ORDER BY priority DESC, run_at ASC, id ASC";

/// An implementation of the Store backed by SQlite
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn push_availability(builder: &mut QueryBuilder<'_, Sqlite>, availability: &Availability) {
    builder
        .push("failed_at IS NULL AND run_at <= ")
        .push_bind(to_millis(availability.now))
        .push(" AND (locked_at IS NULL OR locked_at < ")
        .push_bind(to_millis(availability.expired_before))
        .push(" OR locked_by = ")
        .push_bind(availability.worker.as_str().to_owned())
        .push(")");
    if let Some(min) = availability.priority.min {
        builder.push(" AND priority >= ").push_bind(min);
    }
    if let Some(max) = availability.priority.max {
        builder.push(" AND priority <= ").push_bind(max);
    }
}

fn push_predicate(builder: &mut QueryBuilder<'_, Sqlite>, predicate: &Predicate) {
    match predicate {
        Predicate::Available(availability) => push_availability(builder, availability),
        Predicate::Unleased {
            id,
            now,
            expired_before,
        } => {
            builder
                .push("id = ")
                .push_bind(*id)
                .push(" AND run_at <= ")
                .push_bind(to_millis(*now))
                .push(" AND (locked_at IS NULL OR locked_at < ")
                .push_bind(to_millis(*expired_before))
                .push(")");
        }
        Predicate::HeldBy { id, worker } => {
            builder
                .push("id = ")
                .push_bind(*id)
                .push(" AND locked_by = ")
                .push_bind(worker.as_str().to_owned());
        }
    }
}

#[async_trait]
impl Store for SqliteStore {
    #[instrument(skip_all, err, fields(priority = job.priority, payload_size = job.payload.len()))]
    async fn insert(&self, job: NewJob) -> Result<Job, QueueError> {
        let now = to_millis(now());
        let run_at = job.run_at.map_or(now, to_millis);
        let row = sqlx::query_as::<_, JobRow>(
            "INSERT INTO delayed_jobs (priority, attempts, payload, run_at, created_at, updated_at) \
             VALUES (?1, 0, ?2, ?3, ?4, ?4) RETURNING *",
        )
        .bind(job.priority)
        .bind(job.payload.as_ref())
        .bind(run_at)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("Failed to add job to the queue")?;
        Ok(row.into_job())
    }

    async fn find(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM delayed_jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch job")?;
        Ok(row.map(JobRow::into_job))
    }

    #[instrument(skip_all, err, fields(worker = %lease.locked_by))]
    async fn conditional_update(
        &self,
        predicate: &Predicate,
        lease: &Lease,
        window: Option<Window>,
    ) -> Result<u64, QueueError> {
        let locked_at = to_millis(lease.locked_at);
        let mut builder = QueryBuilder::new("UPDATE delayed_jobs SET locked_at = ");
        builder
            .push_bind(locked_at)
            .push(", locked_by = ")
            .push_bind(lease.locked_by.as_str().to_owned())
            .push(", updated_at = ")
            .push_bind(locked_at)
            .push(" WHERE ");
        push_predicate(&mut builder, predicate);

        if let (Predicate::Available(availability), Some(window)) = (predicate, window) {
            let offset = i64::try_from(window.offset).context("Claim offset out of range")?;
            builder.push(" AND id IN (SELECT id FROM delayed_jobs WHERE ");
            push_availability(&mut builder, availability);
            builder
                .push(" LIMIT ")
                .push_bind(i64::from(window.limit))
                .push(" OFFSET ")
                .push_bind(offset)
                .push(")");
        }

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .context("Failed to lock jobs")?;
        Ok(result.rows_affected())
    }

    async fn count_available(&self, availability: &Availability) -> Result<u64, QueueError> {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM delayed_jobs WHERE ");
        push_availability(&mut builder, availability);
        let count: i64 = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .context("Failed to count available jobs")?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn select_available(
        &self,
        limit: u32,
        availability: &Availability,
    ) -> Result<Vec<Job>, QueueError> {
        let mut builder = QueryBuilder::new("SELECT * FROM delayed_jobs WHERE ");
        push_availability(&mut builder, availability);
        builder
            .push(URGENCY_ORDER)
            .push(" LIMIT ")
            .push_bind(i64::from(limit));
        let rows = builder
            .build_query_as::<JobRow>()
            .fetch_all(&self.pool)
            .await
            .context("Failed to select available jobs")?;
        Ok(rows.into_iter().map(JobRow::into_job).collect())
    }

    async fn select_by_lock(
        &self,
        locked_at: DateTime,
        worker: &WorkerId,
    ) -> Result<Vec<Job>, QueueError> {
        let query = format!(
            "SELECT * FROM delayed_jobs WHERE locked_at = ?1 AND locked_by = ?2{URGENCY_ORDER}"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(to_millis(locked_at))
            .bind(worker.as_str())
            .fetch_all(&self.pool)
            .await
            .context("Failed to read back locked jobs")?;
        Ok(rows.into_iter().map(JobRow::into_job).collect())
    }

    #[instrument(skip_all, err, fields(jid = job.id))]
    async fn save(&self, job: &Job) -> Result<(), QueueError> {
        let result = sqlx::query(
            "UPDATE delayed_jobs SET priority = ?1, attempts = ?2, last_error = ?3, run_at = ?4, \
             locked_at = ?5, locked_by = ?6, failed_at = ?7, updated_at = ?8 WHERE id = ?9",
        )
        .bind(job.priority)
        .bind(i64::from(job.attempts))
        .bind(job.last_error.as_deref())
        .bind(to_millis(job.run_at))
        .bind(job.locked_at().map(to_millis))
        .bind(job.locked_by().map(WorkerId::as_str))
        .bind(job.failed_at.map(to_millis))
        .bind(to_millis(now()))
        .bind(job.id)
        .execute(&self.pool)
        .await
        .context("Failed to save job")?;
        if result.rows_affected() == 0 {
            return Err(QueueError::JobNotFound(job.id));
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, id: JobId) -> Result<bool, QueueError> {
        let result = sqlx::query("DELETE FROM delayed_jobs WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete job")?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip_all, err, fields(worker = %worker))]
    async fn clear_locks(&self, worker: &WorkerId) -> Result<u64, QueueError> {
        let result = sqlx::query(
            "UPDATE delayed_jobs SET locked_at = NULL, locked_by = NULL, updated_at = ?1 \
             WHERE locked_by = ?2",
        )
        .bind(to_millis(now()))
        .bind(worker.as_str())
        .execute(&self.pool)
        .await
        .context("Failed to clear locks")?;
        Ok(result.rows_affected())
    }

    async fn delete_all(&self) -> Result<u64, QueueError> {
        let result = sqlx::query("DELETE FROM delayed_jobs")
            .execute(&self.pool)
            .await
            .context("Failed to flush the queue")?;
        Ok(result.rows_affected())
    }
}
