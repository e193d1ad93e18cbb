use std::error::Error;
use std::time::Duration;

use crate::core::DateTime;

/// Why a job failed: the top-level message plus the chain of underlying causes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub message: String,
    pub trace: Vec<String>,
}

impl JobFailure {
    pub fn new(message: impl Into<String>, trace: Vec<String>) -> Self {
        Self {
            message: message.into(),
            trace,
        }
    }

    pub fn from_error(error: &(dyn Error + 'static)) -> Self {
        let mut trace = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            trace.push(cause.to_string());
            source = cause.source();
        }
        Self::new(error.to_string(), trace)
    }

    /// What gets recorded as `last_error`: the message followed by one line per cause.
    pub fn last_error(&self) -> String {
        format!("{}\n{}", self.message, self.trace.join("\n"))
    }
}

/// Result of executing one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job ran and was removed from the store.
    Success { elapsed: Duration },
    /// The job failed and went through the retry policy.
    Failure(JobFailure),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success { .. })
    }
}

/// Result of a probe-and-skip reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    Ran(JobOutcome),
    /// None of the candidates could be locked, or there were none.
    NoWorkAvailable,
}

/// What the retry policy did with a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Retry { run_at: DateTime, attempts: u32 },
    /// Attempts exhausted, the job was deleted.
    Discarded,
    /// Attempts exhausted, the job was kept with `failed_at` set.
    MarkedFailed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkOffStats {
    pub success: usize,
    pub failure: usize,
}

impl WorkOffStats {
    pub fn total(&self) -> usize {
        self.success + self.failure
    }

    pub fn record(&mut self, outcome: &JobOutcome) {
        if outcome.is_success() {
            self.success += 1;
        } else {
            self.failure += 1;
        }
    }
}
