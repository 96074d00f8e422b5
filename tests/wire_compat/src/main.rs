fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use scrivo_protocol::messages::{
        ExportDocumentRequest, ExtractTextRequest, ExtractTextResult,
    };
    use scrivo_protocol::{Body, Codec, JsonCodec, WirePayload};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Decodes a fixture frame, re-encodes it, and compares the JSON
    /// values (key-order independent).
    fn codec_roundtrip(name: &str) -> scrivo_protocol::Envelope {
        let fixture = load_fixture(name);
        let frame = WirePayload::Text(fixture.to_string());

        let envelope = JsonCodec
            .decode(&frame)
            .unwrap_or_else(|e| panic!("failed to decode {name}: {e}"));
        let encoded = match JsonCodec.encode(&envelope).unwrap() {
            WirePayload::Text(text) => text,
            WirePayload::Binary(_) => panic!("JSON codec produced a binary frame"),
        };
        let reserialized: serde_json::Value = serde_json::from_str(&encoded).unwrap();

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture:    {fixture}\n  re-encoded: {reserialized}"
        );
        envelope
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and
    /// compares the JSON values.
    fn roundtrip_test<T>(name: &str)
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  fixture: {fixture}\n  rust:    {reserialized}"
        );
    }

    // --- Envelope frame tests ---

    #[test]
    fn fixture_envelope_deferred() {
        let envelope = codec_roundtrip("envelope_deferred.json");
        let Body::Deferred(url) = envelope.body else {
            panic!("resultUrl frame must classify as deferred");
        };
        assert_eq!(url, "https://assets.scrivo.app/jobs/0f8fad5b/report.pdf");
    }

    #[test]
    fn fixture_envelope_inline() {
        let envelope = codec_roundtrip("envelope_inline.json");
        let Body::Inline(bytes) = envelope.body else {
            panic!("payload frame must classify as inline");
        };
        let result: ExtractTextResult = serde_json::from_slice(&bytes).unwrap();
        assert!(!result.truncated);
    }

    #[test]
    fn fixture_envelope_error() {
        let envelope = codec_roundtrip("envelope_error.json");
        let Body::Failure(err) = envelope.body else {
            panic!("error frame must classify as a failure");
        };
        assert_eq!(err.code, 422);
        assert_eq!(err.message, "conversion_failed");
    }

    #[test]
    fn fixture_envelope_empty() {
        let envelope = codec_roundtrip("envelope_empty.json");
        assert_eq!(envelope.body, Body::Empty);
    }

    // --- Job payload tests ---

    #[test]
    fn fixture_export_document_request() {
        roundtrip_test::<ExportDocumentRequest>("export_document_request.json");
    }

    #[test]
    fn fixture_extract_text_request() {
        roundtrip_test::<ExtractTextRequest>("extract_text_request.json");
    }

    #[test]
    fn fixture_extract_text_result() {
        roundtrip_test::<ExtractTextResult>("extract_text_result.json");
    }
}
