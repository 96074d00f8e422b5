use serde::{Deserialize, Serialize};

use crate::constants::Action;

/// Error detail reported by the job service inside a reply.
///
/// A `RemoteError` means the service executed the request and declined
/// it. It is carried as a value, not raised as a transport error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    pub code: i32,
    pub message: String,
}

/// Reply body, classified by the codec at decode time.
///
/// Replaces field probing (`resultUrl` present? `error` present?) with a
/// tagged variant so downstream code never inspects raw wire fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Body {
    /// No payload (bare acknowledgement).
    Empty,
    /// Codec-encoded record embedded in the envelope.
    Inline(Vec<u8>),
    /// Large result parked behind a URL, fetched out-of-band over HTTP.
    Deferred(String),
    /// The service declined the request.
    Failure(RemoteError),
}

/// Typed representation of one inbound or outbound message.
///
/// `id` is the correlation id: requests carry a fresh uuid and the
/// service echoes it in the reply, so concurrent jobs with the same
/// action never race for each other's replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    pub action: Action,
    pub body: Body,
}

impl Envelope {
    /// Creates an envelope with the given correlation id, action and body.
    pub fn new(id: impl Into<String>, action: Action, body: Body) -> Self {
        Self {
            id: id.into(),
            action,
            body,
        }
    }

    /// Creates a request envelope carrying a codec-encoded payload.
    pub fn request(id: impl Into<String>, action: Action, payload: Vec<u8>) -> Self {
        Self::new(id, action, Body::Inline(payload))
    }

    /// Creates a failure reply for this envelope's id and action.
    pub fn failure(&self, code: i32, message: impl Into<String>) -> Self {
        Self::new(
            &self.id,
            self.action,
            Body::Failure(RemoteError {
                code,
                message: message.into(),
            }),
        )
    }

    /// Returns `true` if this envelope answers the given request.
    pub fn is_reply_to(&self, id: &str, action: Action) -> bool {
        self.id == id && self.action == action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_inline_body() {
        let env = Envelope::request("job-1", Action::PdfExport, b"{}".to_vec());
        assert_eq!(env.id, "job-1");
        assert_eq!(env.action, Action::PdfExport);
        assert_eq!(env.body, Body::Inline(b"{}".to_vec()));
    }

    #[test]
    fn failure_preserves_id_and_action() {
        let req = Envelope::request("job-2", Action::TextExtract, vec![]);
        let reply = req.failure(422, "unsupported mime type");
        assert_eq!(reply.id, "job-2");
        assert_eq!(reply.action, Action::TextExtract);
        match reply.body {
            Body::Failure(err) => {
                assert_eq!(err.code, 422);
                assert_eq!(err.message, "unsupported mime type");
            }
            other => panic!("expected failure body, got {other:?}"),
        }
    }

    #[test]
    fn is_reply_to_requires_both_id_and_action() {
        let env = Envelope::new("a", Action::PdfExport, Body::Empty);
        assert!(env.is_reply_to("a", Action::PdfExport));
        assert!(!env.is_reply_to("a", Action::DocxExport));
        assert!(!env.is_reply_to("b", Action::PdfExport));
    }
}
