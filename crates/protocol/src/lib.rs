//! Wire protocol types for Scrivo job service communication.
//!
//! Defines the message envelope, the typed job payloads, and the two
//! codecs (textual JSON and compact binary) that translate envelopes
//! to and from wire bytes.

pub mod codec;
pub mod constants;
pub mod envelope;
pub mod messages;

pub use codec::{BinaryCodec, Codec, CodecError, JsonCodec, WireFormat, WirePayload};
pub use constants::Action;
pub use envelope::{Body, Envelope, RemoteError};
