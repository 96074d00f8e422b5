use serde::{Deserialize, Serialize};

use crate::constants::Action;

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Asks the service to export a document to the format implied by the
/// envelope's action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocumentRequest {
    pub document_id: String,
    /// Restricts the export to a page range, e.g. `"1-4"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_range: Option<String>,
    #[serde(default)]
    pub include_annotations: bool,
}

/// Asks the service to extract the plain text of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractTextRequest {
    pub document_id: String,
    /// Source mime type hint; empty means "let the service sniff it".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Inline reply to a [`ExtractTextRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractTextResult {
    pub text: String,
    #[serde(default)]
    pub truncated: bool,
}

// ---------------------------------------------------------------------------
// Export formats
// ---------------------------------------------------------------------------

/// Output format for a document export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Pdf,
    Docx,
    Html,
}

impl ExportFormat {
    /// The job action that produces this format.
    pub fn action(self) -> Action {
        match self {
            ExportFormat::Pdf => Action::PdfExport,
            ExportFormat::Docx => Action::DocxExport,
            ExportFormat::Html => Action::HtmlExport,
        }
    }

    /// Conventional file extension for the exported artifact.
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Docx => "docx",
            ExportFormat::Html => "html",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_request_omits_empty_optionals() {
        let req = ExportDocumentRequest {
            document_id: "d1".into(),
            page_range: None,
            include_annotations: false,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"documentId\":\"d1\""));
        assert!(!json.contains("pageRange"));
    }

    #[test]
    fn extract_request_defaults_mime_type() {
        let req: ExtractTextRequest = serde_json::from_str(r#"{"documentId":"d2"}"#).unwrap();
        assert_eq!(req.document_id, "d2");
        assert!(req.mime_type.is_empty());
    }

    #[test]
    fn extract_result_roundtrip() {
        let result = ExtractTextResult {
            text: "hello".into(),
            truncated: true,
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: ExtractTextResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn export_format_maps_to_action_and_extension() {
        assert_eq!(ExportFormat::Pdf.action(), Action::PdfExport);
        assert_eq!(ExportFormat::Docx.action(), Action::DocxExport);
        assert_eq!(ExportFormat::Html.extension(), "html");
    }
}
