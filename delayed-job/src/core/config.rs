use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::core::store::PriorityRange;
use crate::core::Duration;

/// Lease owner key. Workers that keep the same identity across restarts can resume leases they
/// held before crashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// `host:<hostname> pid:<pid>`, or just `pid:<pid>` when the hostname can't be read.
    pub fn from_host() -> Self {
        let pid = std::process::id();
        match hostname::get().ok().and_then(|h| h.into_string().ok()) {
            Some(host) => Self(format!("host:{host} pid:{pid}")),
            None => Self(format!("pid:{pid}")),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for WorkerId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// What happens to a job once it has used up all of its attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailedJobRetention {
    /// Delete the row.
    #[default]
    Discard,
    /// Keep the row with `failed_at` set so the failure can be inspected.
    Keep,
}

impl FromStr for FailedJobRetention {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "discard" => Ok(Self::Discard),
            "keep" => Ok(Self::Keep),
            _ => Err(()),
        }
    }
}

/// How a worker acquires jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClaimStrategy {
    /// Lock a batch with one conditional update, then read it back.
    #[default]
    Batch,
    /// Read a few candidates and lock the first one that isn't contested.
    Probe,
}

impl FromStr for ClaimStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "batch" => Ok(Self::Batch),
            "probe" => Ok(Self::Probe),
            _ => Err(()),
        }
    }
}

/// Upper bound on `max_attempts`. The backoff of the last retry stays within a few thousand years.
pub const MAX_ATTEMPTS_LIMIT: u32 = 1000;

/// Upper bound on `max_run_time` and `poll_interval` in seconds (100 years), so lease windows
/// and sleeps stay representable.
pub const LONGEST_INTERVAL_SECS: i64 = 36_500 * 86_400;

/// Worker configuration. Constructed once at startup and handed to the worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: WorkerId,
    /// Only jobs within this range are selected.
    pub priority: PriorityRange,
    /// How long a lease is honored before other workers may take the job over. This does not
    /// interrupt a job that is still running.
    pub max_run_time: Duration,
    /// A job is executed at most this many times.
    pub max_attempts: u32,
    pub failed_job_retention: FailedJobRetention,
    pub batch_size: u32,
    /// Jobs to attempt per `work_off` pass.
    pub work_off_total: u32,
    /// Sleep between passes that found no work.
    pub poll_interval: Duration,
    pub strategy: ClaimStrategy,
    /// Retries of a batch claim that failed on a store error.
    pub claim_retries: u32,
    pub claim_retry_pause: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: WorkerId::from_host(),
            priority: PriorityRange::default(),
            max_run_time: Duration::minutes(15),
            max_attempts: 25,
            failed_job_retention: FailedJobRetention::Discard,
            batch_size: 25,
            work_off_total: 100,
            poll_interval: Duration::seconds(5),
            strategy: ClaimStrategy::Batch,
            claim_retries: 5,
            claim_retry_pause: Duration::seconds(1),
        }
    }
}

impl WorkerConfig {
    pub fn with_worker_id(mut self, worker_id: impl Into<WorkerId>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_priority_range(mut self, min: Option<i32>, max: Option<i32>) -> Self {
        self.priority = PriorityRange { min, max };
        self
    }

    pub fn with_max_run_time(mut self, max_run_time: Duration) -> Self {
        self.max_run_time = max_run_time;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_failed_job_retention(mut self, retention: FailedJobRetention) -> Self {
        self.failed_job_retention = retention;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_work_off_total(mut self, total: u32) -> Self {
        self.work_off_total = total;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_strategy(mut self, strategy: ClaimStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_claim_retry(mut self, retries: u32, pause: Duration) -> Self {
        self.claim_retries = retries;
        self.claim_retry_pause = pause;
        self
    }

    /// Read overrides from the process environment on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`WorkerConfig::from_env`], but with a custom lookup. Unset keys keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(name) = lookup("WORKER_NAME") {
            config.worker_id = WorkerId::new(name);
        }
        config.priority.min = parse(&lookup, "MIN_PRIORITY")?;
        config.priority.max = parse(&lookup, "MAX_PRIORITY")?;
        if let Some(max_run_time) = parse_seconds(&lookup, "MAX_RUN_TIME")? {
            config.max_run_time = max_run_time;
        }
        if let Some(max_attempts) = parse(&lookup, "MAX_ATTEMPTS")? {
            config.max_attempts = max_attempts;
        }
        if let Some(retention) = parse(&lookup, "FAILED_JOB_RETENTION")? {
            config.failed_job_retention = retention;
        }
        if let Some(batch_size) = parse(&lookup, "BATCH_SIZE")? {
            config.batch_size = batch_size;
        }
        if let Some(poll_interval) = parse_seconds(&lookup, "POLL_INTERVAL")? {
            config.poll_interval = poll_interval;
        }
        if let Some(strategy) = parse(&lookup, "CLAIM_STRATEGY")? {
            config.strategy = strategy;
        }
        config.validate()
    }

    /// Reject values the worker loop can't operate with.
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.worker_id.as_str().trim().is_empty() {
            return Err(ConfigError::EmptyWorkerId);
        }
        if let (Some(min), Some(max)) = (self.priority.min, self.priority.max) {
            if min > max {
                return Err(ConfigError::PriorityRange { min, max });
            }
        }
        if self.max_run_time <= Duration::zero() {
            return Err(ConfigError::NonPositive("max_run_time"));
        }
        if self.poll_interval <= Duration::zero() {
            return Err(ConfigError::NonPositive("poll_interval"));
        }
        if self.claim_retry_pause < Duration::zero() {
            return Err(ConfigError::NonPositive("claim_retry_pause"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::NonPositive("max_attempts"));
        }
        if self.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(ConfigError::InvalidValue {
                key: "max_attempts",
                value: self.max_attempts.to_string(),
            });
        }
        if self.max_run_time.num_seconds() > LONGEST_INTERVAL_SECS {
            return Err(ConfigError::InvalidValue {
                key: "max_run_time",
                value: self.max_run_time.to_string(),
            });
        }
        if self.poll_interval.num_seconds() > LONGEST_INTERVAL_SECS {
            return Err(ConfigError::InvalidValue {
                key: "poll_interval",
                value: self.poll_interval.to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::NonPositive("batch_size"));
        }
        if self.work_off_total == 0 {
            return Err(ConfigError::NonPositive("work_off_total"));
        }
        Ok(self)
    }
}

fn parse_seconds<F>(lookup: &F, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse::<i64, _>(lookup, key)? {
        None => Ok(None),
        Some(secs) => Duration::try_seconds(secs)
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidValue {
                key,
                value: secs.to_string(),
            }),
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
    }
}

/// Invalid worker configuration. Raised before the worker starts.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    NonPositive(&'static str),
    #[error("min_priority {min} is greater than max_priority {max}")]
    PriorityRange { min: i32, max: i32 },
    #[error("Worker identity must not be empty")]
    EmptyWorkerId,
}
