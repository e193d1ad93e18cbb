use crate::core::codec;
use crate::core::job::JobId;
use crate::core::job_processor::{JobError, JobProcessor};
use async_trait::async_trait;
use bincode::{Decode, Encode};
use bytes::Bytes;
use tracing::instrument;

/// Shorthand for boxed trait object for a WrappedJob.
pub type BoxedJobHandler = Box<dyn JobProcessor<Payload = Bytes, Error = JobError>>;

/// Object-safe implementation of a job that can be used in runner. Generally speaking, you don't
/// need to directly use this type, RunnerRouter takes care of everything related to it.
pub struct WrappedJobHandler<T: JobProcessor> {
    job: T,
}

impl<J> WrappedJobHandler<J>
where
    J: JobProcessor + 'static,
    J::Payload: Decode + Encode,
    J::Error: Into<JobError>,
{
    pub fn new(job: J) -> Self {
        Self { job }
    }

    pub fn boxed(self) -> BoxedJobHandler {
        Box::new(self) as BoxedJobHandler
    }
}

#[async_trait]
impl<J> JobProcessor for WrappedJobHandler<J>
where
    J: JobProcessor + 'static,
    J::Payload: Decode + Encode,
    J::Error: Into<JobError>,
{
    /// Envelope body, still encoded.
    type Payload = Bytes;
    type Error = JobError;

    #[instrument(skip_all, err, fields(jid = jid, job_type = %Self::name()))]
    async fn handle(&self, jid: JobId, payload: Self::Payload) -> Result<(), Self::Error> {
        let payload: J::Payload = codec::decode_body(payload.as_ref())?;
        self.job.handle(jid, payload).await.map_err(Into::into)
    }

    fn name() -> &'static str {
        J::name()
    }

    fn version() -> u32 {
        J::version()
    }
}

impl<J> From<J> for WrappedJobHandler<J>
where
    J: JobProcessor + 'static,
    J::Payload: Decode + Encode,
    J::Error: Into<JobError>,
{
    fn from(job: J) -> Self {
        Self::new(job)
    }
}
