//! Textual JSON codec.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::{Codec, CodecError, WireFormat, WirePayload};
use crate::constants::Action;
use crate::envelope::{Body, Envelope, RemoteError};

/// JSON wire shape shared with the job service.
///
/// The `payload` field uses `serde_json::value::RawValue` to defer
/// deserialization of job-specific records.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Wire {
    id: String,
    #[serde(rename = "type")]
    action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload: Option<Box<serde_json::value::RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RemoteError>,
}

/// Textual codec: UTF-8 JSON frames.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn wire_format(&self) -> WireFormat {
        WireFormat::Text
    }

    fn encode(&self, envelope: &Envelope) -> Result<WirePayload, CodecError> {
        let mut wire = Wire {
            id: envelope.id.clone(),
            action: envelope.action,
            payload: None,
            result_url: None,
            error: None,
        };
        match &envelope.body {
            Body::Empty => {}
            Body::Inline(bytes) => {
                let text = String::from_utf8(bytes.clone())
                    .map_err(|_| CodecError::Malformed("inline payload is not UTF-8".into()))?;
                wire.payload = Some(serde_json::value::RawValue::from_string(text)?);
            }
            Body::Deferred(url) => wire.result_url = Some(url.clone()),
            Body::Failure(err) => wire.error = Some(err.clone()),
        }
        Ok(WirePayload::Text(serde_json::to_string(&wire)?))
    }

    fn decode(&self, payload: &WirePayload) -> Result<Envelope, CodecError> {
        let WirePayload::Text(text) = payload else {
            return Err(CodecError::WrongFrame { expected: "text" });
        };
        let wire: Wire = serde_json::from_str(text)?;

        // Classification precedence: a reply carrying an error is a
        // failure even if other fields are also present.
        let body = if let Some(err) = wire.error {
            Body::Failure(err)
        } else if let Some(url) = wire.result_url {
            Body::Deferred(url)
        } else if let Some(raw) = wire.payload {
            Body::Inline(raw.get().as_bytes().to_vec())
        } else {
            Body::Empty
        };

        Ok(Envelope {
            id: wire.id,
            action: wire.action,
            body,
        })
    }

    fn encode_payload<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode_payload<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
