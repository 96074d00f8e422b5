use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often to send WebSocket ping frames.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Read deadline: if *nothing* arrives within this window (no pong, no
/// reply, no push event) the connection is considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// Maximum WebSocket message size in bytes (16 MB).
///
/// Large artifacts never travel over the socket; the service parks them
/// behind a URL and the client fetches them over HTTP.
pub const WS_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default time to wait for one job's correlated reply.
pub const JOB_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Job action identifier carried in every envelope.
///
/// The wire names are shared with the job service and must not change
/// without a protocol version bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "pdf_export")]
    PdfExport,
    #[serde(rename = "docx_export")]
    DocxExport,
    #[serde(rename = "html_export")]
    HtmlExport,
    #[serde(rename = "text_extract")]
    TextExtract,
}

impl Action {
    /// Returns the wire name of this action.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::PdfExport => "pdf_export",
            Action::DocxExport => "docx_export",
            Action::HtmlExport => "html_export",
            Action::TextExtract => "text_extract",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
