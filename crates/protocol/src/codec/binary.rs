//! Compact binary codec.
//!
//! Uses `postcard`, a schema-driven non-self-describing encoding: field
//! order and enum variant indices come from the Rust type definitions in
//! [`crate::envelope`], which are versioned together with the service's
//! schema. Frames are raw byte buffers, so the connection must be in
//! binary receive mode while this codec is active.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::codec::{Codec, CodecError, WireFormat, WirePayload};
use crate::envelope::Envelope;

/// Binary codec: postcard-encoded frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryCodec;

impl Codec for BinaryCodec {
    fn wire_format(&self) -> WireFormat {
        WireFormat::Binary
    }

    fn encode(&self, envelope: &Envelope) -> Result<WirePayload, CodecError> {
        Ok(WirePayload::Binary(postcard::to_allocvec(envelope)?))
    }

    fn decode(&self, payload: &WirePayload) -> Result<Envelope, CodecError> {
        let WirePayload::Binary(bytes) = payload else {
            return Err(CodecError::WrongFrame { expected: "binary" });
        };
        Ok(postcard::from_bytes(bytes)?)
    }

    fn encode_payload<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(postcard::to_allocvec(value)?)
    }

    fn decode_payload<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}
