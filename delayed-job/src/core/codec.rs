//! Payload envelope.
//!
//! Every payload is stored as a bincode-encoded [`Envelope`] that names the processor it belongs
//! to. The body is the processor's own payload, bincode-encoded as well.

use bincode::config::{standard, Configuration};
use bincode::{Decode, Encode};
use bytes::Bytes;

use crate::core::job_processor::{JobError, JobProcessor};

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Envelope {
    pub type_id: String,
    pub type_version: u32,
    pub body: Vec<u8>,
}

fn config() -> Configuration {
    standard()
}

impl Envelope {
    /// Wrap a payload of `J`.
    pub fn wrap<J>(payload: &J::Payload) -> Result<Self, bincode::error::EncodeError>
    where
        J: JobProcessor + 'static,
        J::Payload: Encode,
    {
        Ok(Self {
            type_id: J::name().to_string(),
            type_version: J::version(),
            body: bincode::encode_to_vec(payload, config())?,
        })
    }

    pub fn to_bytes(&self) -> Result<Bytes, bincode::error::EncodeError> {
        bincode::encode_to_vec(self, config()).map(Bytes::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, JobError> {
        let (envelope, _) = bincode::decode_from_slice(bytes, config())?;
        Ok(envelope)
    }
}

/// Encode a payload of `J` the way it is stored in the queue.
pub fn encode<J>(payload: &J::Payload) -> Result<Bytes, bincode::error::EncodeError>
where
    J: JobProcessor + 'static,
    J::Payload: Encode,
{
    Envelope::wrap::<J>(payload)?.to_bytes()
}

/// Decode the body of an envelope into the payload type of a processor.
pub fn decode_body<P: Decode>(body: &[u8]) -> Result<P, JobError> {
    let (payload, _) = bincode::decode_from_slice(body, config())?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::JobId;
    use std::convert::Infallible;

    struct Resize;

    #[async_trait::async_trait]
    impl JobProcessor for Resize {
        type Payload = (u32, u32);
        type Error = Infallible;

        async fn handle(&self, _jid: JobId, _payload: Self::Payload) -> Result<(), Infallible> {
            Ok(())
        }

        fn name() -> &'static str {
            "resize"
        }

        fn version() -> u32 {
            3
        }
    }

    #[test]
    fn envelope_carries_type_and_version() {
        let bytes = encode::<Resize>(&(640, 480)).unwrap();
        let envelope = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(envelope.type_id, "resize");
        assert_eq!(envelope.type_version, 3);
        let body: (u32, u32) = decode_body(&envelope.body).unwrap();
        assert_eq!(body, (640, 480));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = Envelope::from_bytes(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(err.is_decode_error());
    }
}
