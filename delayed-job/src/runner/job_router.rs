use super::wrapped_job::{BoxedJobHandler, WrappedJobHandler};
use crate::core::codec::Envelope;
use crate::core::job::JobId;
use crate::core::job_processor::{JobError, JobProcessor};
use bincode::{Decode, Encode};
use bytes::Bytes;
use std::collections::HashMap;

struct Registered {
    version: u32,
    handler: BoxedJobHandler,
}

/// A job processor router. Matches the type id in a payload envelope to the processor
/// implementation, which is the only way a stored payload becomes something runnable.
/// This type requires that your jobs implement `Encode` + `Decode` from bincode. Those traits are
/// re-exported in prelude.
///
/// ## Example
/// ```rust
/// use delayed_job::prelude::{JobProcessor, RunnerRouter, Encode, Decode, JobId};
/// use async_trait::async_trait;
/// struct MyJob;
/// #[derive(Encode, Decode)]
/// struct MyJobPayload(u8, String);
///
/// #[async_trait::async_trait]
/// impl JobProcessor for MyJob {
///     type Payload = MyJobPayload;
///     type Error = anyhow::Error;
///
///     fn name() -> &'static str {
///         "my_job"
///     }
///
///     async fn handle(&self, jid: JobId, payload: Self::Payload) -> Result<(), Self::Error> {
///         // ..do work
///         Ok(())
///     }
/// }
///
/// let router = {
///     let mut r = RunnerRouter::default();
///     r.add_job_handler(MyJob);
///     r
/// };
///
///```
#[derive(Default)]
pub struct RunnerRouter {
    jobs: HashMap<&'static str, Registered>,
}

impl RunnerRouter {
    /// Register a job handler with the router. If job by that name already present, it will get replaced.
    pub fn add_job_handler<J>(&mut self, job: J)
    where
        J: JobProcessor + 'static,
        J::Payload: Decode + Encode,
        J::Error: Into<JobError>,
    {
        let name = J::name();
        let registered = Registered {
            version: J::version(),
            handler: WrappedJobHandler::new(job).boxed(),
        };
        if self.jobs.insert(name, registered).is_some() {
            tracing::warn!("Replacing job handler for {}", name);
        }
    }

    pub fn types(&self) -> Vec<&'static str> {
        self.jobs.keys().copied().collect()
    }

    /// Turn a stored payload into an invocation. Fails with a decode error if the envelope is
    /// corrupt, names a job type nobody registered, or was written with another payload version.
    pub fn decode(&self, payload: &[u8]) -> Result<Invocation<'_>, JobError> {
        let envelope = Envelope::from_bytes(payload)?;
        let registered = self
            .jobs
            .get(envelope.type_id.as_str())
            .ok_or_else(|| JobError::UnknownJobType(envelope.type_id.clone()))?;
        if registered.version != envelope.type_version {
            return Err(JobError::UnsupportedVersion {
                type_id: envelope.type_id,
                expected: registered.version,
                found: envelope.type_version,
            });
        }
        Ok(Invocation {
            type_id: envelope.type_id,
            handler: &registered.handler,
            body: Bytes::from(envelope.body),
        })
    }
}

/// A decoded payload bound to its processor.
pub struct Invocation<'a> {
    type_id: String,
    handler: &'a BoxedJobHandler,
    body: Bytes,
}

impl Invocation<'_> {
    pub fn type_id(&self) -> &str {
        &self.type_id
    }

    pub async fn invoke(self, jid: JobId) -> Result<(), JobError> {
        self.handler.handle(jid, self.body).await
    }
}
