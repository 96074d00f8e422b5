//! Pluggable wire codecs.
//!
//! A codec is a pure, stateless transform between an [`Envelope`] and a
//! wire payload. Two implementations exist: [`JsonCodec`] (textual) and
//! [`BinaryCodec`] (compact, schema-driven). The connection asks the
//! codec for its [`WireFormat`] to decide which WebSocket frame kind to
//! send and to reject frames of the wrong kind on receive.

mod binary;
mod json;

pub use binary::BinaryCodec;
pub use json::JsonCodec;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::envelope::Envelope;

/// Wire representation a codec produces and consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Text,
    Binary,
}

/// One encoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub enum WirePayload {
    Text(String),
    Binary(Vec<u8>),
}

impl WirePayload {
    /// Returns the frame kind of this payload.
    pub fn format(&self) -> WireFormat {
        match self {
            WirePayload::Text(_) => WireFormat::Text,
            WirePayload::Binary(_) => WireFormat::Binary,
        }
    }
}

/// Errors from encoding or decoding wire messages.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary codec error: {0}")]
    Binary(#[from] postcard::Error),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("expected a {expected} frame for this codec")]
    WrongFrame { expected: &'static str },
}

/// Bidirectional transform between typed envelopes and wire payloads.
///
/// `decode(encode(e))` must equal `e` for every envelope the codec
/// declares support for. Job-specific records travelling inside
/// [`crate::envelope::Body::Inline`] are encoded with the payload pair
/// so that one codec governs the whole wire.
pub trait Codec: Send + Sync + 'static {
    /// The frame kind this codec speaks.
    fn wire_format(&self) -> WireFormat;

    /// Encodes an envelope into a wire payload.
    fn encode(&self, envelope: &Envelope) -> Result<WirePayload, CodecError>;

    /// Decodes a wire payload into an envelope.
    ///
    /// Fails with [`CodecError::WrongFrame`] when handed a frame of the
    /// other kind, and with a decode error on malformed bytes, never
    /// silently drops input.
    fn decode(&self, payload: &WirePayload) -> Result<Envelope, CodecError>;

    /// Encodes a job-specific record for embedding in an envelope body.
    fn encode_payload<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    /// Decodes a job-specific record out of an envelope body.
    fn decode_payload<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}
