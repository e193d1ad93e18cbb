use crate::core::job::JobId;
use async_trait::async_trait;
use std::convert::Infallible;
use thiserror::Error;

/// A job-handler interface. Your Payload should implement `bincode::{Decode, Encode}` if you're
/// planning to enqueue it and run it with the worker from this crate.
///
/// ## Example
/// ```rust
/// use delayed_job::prelude::{JobProcessor, Encode, Decode, JobId};
/// use async_trait::async_trait;
/// struct SendInvoice;
///
/// impl SendInvoice {
///     async fn do_work(&self, _invoice: u64) -> anyhow::Result<()> {
///         // ..do some work
///         Ok(())
///     }
/// }
///
/// #[derive(Encode, Decode)]
/// struct SendInvoicePayload {
///     invoice_id: u64,
/// }
///
/// #[async_trait::async_trait]
/// impl JobProcessor for SendInvoice {
///     type Payload = SendInvoicePayload;
///     type Error = anyhow::Error;
///
///     fn name() -> &'static str {
///         "send_invoice"
///     }
///
///     async fn handle(&self, _jid: JobId, payload: Self::Payload) -> Result<(), Self::Error> {
///         self.do_work(payload.invoice_id).await
///     }
/// }
/// ```
/// ## Services
/// If your job processor requires external services (i.e. database client, REST client, etc.), add
/// them directly as your struct fields.
///
/// ## Idempotency
/// A job that runs longer than the worker's `max_run_time` may be picked up by another worker
/// while it is still running. Handlers must be safe to run more than once.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// What is the input to this handler. It must implement `bincode::Decode` and
    /// `bincode::Encode` to go through the queue.
    type Payload: Send;
    /// What error is returned
    type Error: Send;

    /// Run the job, passing payload to it.
    async fn handle(&self, jid: JobId, payload: Self::Payload) -> Result<(), Self::Error>;

    /// Job type, stored in every payload envelope and used to route it back to this processor.
    fn name() -> &'static str
    where
        Self: Sized;

    /// Version of the payload layout. Envelopes written with a different version are rejected
    /// instead of being decoded into the wrong shape.
    fn version() -> u32
    where
        Self: Sized,
    {
        1
    }
}

/// Error types returned while decoding or running a job.
#[derive(Error, Debug)]
pub enum JobError {
    /// Encountered an error when tried to deserialize the payload.
    #[error("Failed to deserialize job payload")]
    DecodeError {
        #[from]
        source: bincode::error::DecodeError,
    },

    /// No processor with that name is registered.
    #[error("Runner is not configured to run this job type: {0}")]
    UnknownJobType(String),

    #[error("Job type {type_id} is registered with version {expected}, payload has version {found}")]
    UnsupportedVersion {
        type_id: String,
        expected: u32,
        found: u32,
    },

    #[error("Job panicked: {0}")]
    Panicked(String),

    /// Error originated in inner-job implementation
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl JobError {
    /// Whether the payload could not be turned into something runnable.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            JobError::DecodeError { .. }
                | JobError::UnknownJobType(_)
                | JobError::UnsupportedVersion { .. }
        )
    }
}

impl From<Infallible> for JobError {
    fn from(_: Infallible) -> Self {
        unreachable!();
    }
}
