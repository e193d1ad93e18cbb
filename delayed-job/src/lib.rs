#![doc = include_str!("../README.md")]

pub mod core;

/// Default implementation of the worker: lease manager, retry policy and the worker loop.
#[cfg(feature = "runner")]
pub mod runner {
    pub mod hooks;
    pub mod job_router;
    pub mod lease;
    pub mod outcome;
    pub mod retry;
    pub mod shutdown;
    pub mod worker;
    pub mod wrapped_job;
}

/// Re-exports to simplify importing this crate types.
pub mod prelude {
    pub use super::core::{
        config::{ClaimStrategy, ConfigError, FailedJobRetention, WorkerConfig, WorkerId},
        job::{Job, JobId, Lease, NewJob},
        job_processor::{JobError, JobProcessor},
        memory::MemoryStore,
        queue::Queue,
        store::{Availability, Predicate, PriorityRange, QueueError, Store, Window},
        DateTime, Duration,
    };
    #[cfg(feature = "runner")]
    pub use super::runner::{
        hooks::WorkerHooks,
        job_router::RunnerRouter,
        lease::LeaseManager,
        outcome::{JobFailure, JobOutcome, Reservation, Resolution, WorkOffStats},
        retry::RetryPolicy,
        shutdown::shutdown_signal,
        worker::Worker,
    };
    pub use bincode::{Decode, Encode};
    pub use tokio_util::sync::CancellationToken;
}
