use delayed_job::core::config::WorkerId;
use delayed_job::core::job::{Job, Lease};
use delayed_job::core::{Bytes, DateTime};
use sqlx::sqlite::SqliteRow;
use sqlx::{Error, FromRow, Row};

/// Timestamps are stored as unix milliseconds so that comparisons in SQL are plain integer
/// comparisons and lease stamps round-trip exactly.
pub(crate) fn to_millis(at: DateTime) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> Result<DateTime, Error> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| Error::Decode(format!("timestamp out of range: {millis}").into()))
}

fn from_millis_opt(millis: Option<i64>) -> Result<Option<DateTime>, Error> {
    millis.map(from_millis).transpose()
}

#[derive(Debug)]
pub(crate) struct JobRow(Job);

impl JobRow {
    pub fn into_job(self) -> Job {
        self.0
    }
}

impl<'r> FromRow<'r, SqliteRow> for JobRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, Error> {
        let id: i64 = row.try_get("id")?;
        let priority = row.try_get("priority")?;
        let attempts = row
            .try_get::<i64, _>("attempts")
            .map(u32::try_from)?
            .map_err(|e| Error::Decode(Box::new(e)))?;
        let payload = row.try_get::<Vec<u8>, _>("payload").map(Bytes::from)?;
        let last_error = row.try_get("last_error")?;
        let run_at = row.try_get("run_at").and_then(from_millis)?;
        let locked_at = row.try_get("locked_at").and_then(from_millis_opt)?;
        let locked_by: Option<String> = row.try_get("locked_by")?;
        let lease = match (locked_at, locked_by) {
            (Some(locked_at), Some(locked_by)) => Some(Lease::new(locked_at, WorkerId::new(locked_by))),
            (None, None) => None,
            _ => {
                return Err(Error::Decode(
                    format!("job {id} has a half-set lease").into(),
                ))
            }
        };
        let failed_at = row.try_get("failed_at").and_then(from_millis_opt)?;
        let created_at = row.try_get("created_at").and_then(from_millis)?;
        let updated_at = row.try_get("updated_at").and_then(from_millis)?;
        Ok(Self(Job {
            id,
            priority,
            attempts,
            payload,
            last_error,
            run_at,
            lease,
            failed_at,
            created_at,
            updated_at,
        }))
    }
}
