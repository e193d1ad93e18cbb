use chrono::SubsecRound;

pub type DateTime = chrono::DateTime<chrono::Utc>;
pub use bincode;
pub use bytes::Bytes;
pub use chrono::{Duration, Utc};
pub use tokio_util::sync::CancellationToken;

pub mod codec;
pub mod config;
pub mod job;
pub mod job_processor;
pub mod memory;
pub mod queue;
pub mod store;

/// Current time truncated to millisecond precision, which is what every store persists.
/// Lease stamps must round-trip through storage unchanged for `select_by_lock` to find them.
pub fn now() -> DateTime {
    Utc::now().trunc_subsecs(3)
}
