use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use scrivo_assets::AssetFetcher;
use scrivo_connection::{Connection, ConnectionError, WaitError};
use scrivo_protocol::constants::JOB_REPLY_TIMEOUT;
use scrivo_protocol::messages::{
    ExportDocumentRequest, ExportFormat, ExtractTextRequest, ExtractTextResult,
};
use scrivo_protocol::{Action, Body, Codec, CodecError, Envelope, RemoteError};

/// Errors that reject a dispatcher call.
///
/// A decline reported by the service is *not* in this list; it resolves
/// as [`JobOutcome::Failed`], because the service executed correctly.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Sent outside the `Open` state.
    #[error("not connected")]
    NotConnected,

    /// The connection dropped before the reply arrived. Not retried
    /// here; the caller decides whether to re-open and resubmit.
    #[error("connection closed")]
    ConnectionClosed,

    /// No correlated reply within the allotted window.
    #[error("timed out waiting for reply")]
    TimedOut,

    /// Malformed reply or payload.
    #[error("decode error: {0}")]
    Decode(#[from] CodecError),

    /// The job completed remotely but its binary result could not be
    /// retrieved out-of-band.
    #[error("asset fetch failed: {url}")]
    AssetFetch { url: String },

    /// Any other transport-level failure.
    #[error("transport error: {0}")]
    Transport(#[source] ConnectionError),
}

impl From<ConnectionError> for JobError {
    fn from(e: ConnectionError) -> Self {
        match e {
            ConnectionError::NotConnected => JobError::NotConnected,
            ConnectionError::Closed => JobError::ConnectionClosed,
            ConnectionError::Codec(c) => JobError::Decode(c),
            other => JobError::Transport(other),
        }
    }
}

impl From<WaitError> for JobError {
    fn from(e: WaitError) -> Self {
        match e {
            WaitError::ConnectionClosed => JobError::ConnectionClosed,
            WaitError::TimedOut => JobError::TimedOut,
        }
    }
}

/// Result of one dispatched job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome<T> {
    /// The service produced the requested artifact.
    Completed(T),
    /// The service executed the request and declined it.
    Failed(RemoteError),
}

/// A named binary artifact produced by a job.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// One job submission: action tag, typed payload, and per-call knobs.
#[derive(Debug, Clone)]
pub struct JobRequest<Req> {
    pub action: Action,
    pub data: Req,
    pub file_name: Option<String>,
    pub timeout: Option<Duration>,
}

impl<Req> JobRequest<Req> {
    pub fn new(action: Action, data: Req) -> Self {
        Self {
            action,
            data,
            file_name: None,
            timeout: None,
        }
    }

    /// Names the resulting artifact.
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Overrides the dispatcher's reply timeout for this call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Sends tagged requests over the shared connection and collects the
/// correlated replies.
///
/// Every request carries a fresh uuid which the service echoes, so any
/// number of calls, including same-action calls, may be in flight
/// concurrently over one connection. Delivery is at-most-once per call;
/// retry policy is the caller's concern.
pub struct Dispatcher<C: Codec> {
    connection: Arc<Connection<C>>,
    fetcher: Arc<AssetFetcher>,
    reply_timeout: Duration,
}

impl<C: Codec> Dispatcher<C> {
    pub fn new(connection: Arc<Connection<C>>, fetcher: Arc<AssetFetcher>) -> Self {
        Self {
            connection,
            fetcher,
            reply_timeout: JOB_REPLY_TIMEOUT,
        }
    }

    /// Sets the default window to wait for a reply.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Sends one request and waits for its correlated reply.
    ///
    /// The wait is registered before the send, so a reply arriving in
    /// the same scheduling turn cannot slip past.
    async fn exchange<Req: Serialize>(
        &self,
        action: Action,
        data: &Req,
        timeout: Option<Duration>,
    ) -> Result<Envelope, JobError> {
        let id = uuid::Uuid::new_v4().to_string();
        let payload = self.connection.codec().encode_payload(data)?;
        let request = Envelope::request(&id, action, payload);

        let window = timeout.unwrap_or(self.reply_timeout);
        let wanted = id.clone();
        let wait = self
            .connection
            .wait_for_message(move |m| m.is_reply_to(&wanted, action), Some(window));

        debug!(%action, id = %id, "dispatching job");
        self.connection.send(&request).await?;
        Ok(wait.wait().await?)
    }

    /// Runs one job and returns its artifact.
    ///
    /// A `Deferred` reply is completed through the asset fetcher; an
    /// `Inline` reply's raw payload bytes become the artifact as-is
    /// (typed wrappers and [`Dispatcher::run_with`] decode them).
    pub async fn run<Req: Serialize>(
        &self,
        request: JobRequest<Req>,
    ) -> Result<JobOutcome<Artifact>, JobError> {
        let JobRequest {
            action,
            data,
            file_name,
            timeout,
        } = request;
        let reply = self.exchange(action, &data, timeout).await?;
        let file_name = file_name.unwrap_or_else(|| format!("{action}.bin"));

        match reply.body {
            Body::Failure(err) => {
                warn!(%action, code = err.code, "job declined: {}", err.message);
                Ok(JobOutcome::Failed(err))
            }
            Body::Deferred(url) => {
                let bytes = self
                    .fetcher
                    .fetch(&url)
                    .await
                    .ok_or(JobError::AssetFetch { url })?;
                Ok(JobOutcome::Completed(Artifact { file_name, bytes }))
            }
            Body::Inline(bytes) => Ok(JobOutcome::Completed(Artifact { file_name, bytes })),
            Body::Empty => Ok(JobOutcome::Completed(Artifact {
                file_name,
                bytes: Vec::new(),
            })),
        }
    }

    /// Runs one job with caller-supplied reply processing.
    ///
    /// `process_result` turns the raw reply into artifact bytes (it may
    /// fetch out-of-band itself); `handle_success` builds the final
    /// typed value. Declines short-circuit to `Failed` before either
    /// hook runs.
    pub async fn run_with<Req, T, P, PFut, H>(
        &self,
        request: JobRequest<Req>,
        process_result: P,
        handle_success: H,
    ) -> Result<JobOutcome<T>, JobError>
    where
        Req: Serialize,
        P: FnOnce(Envelope) -> PFut,
        PFut: Future<Output = Result<Vec<u8>, JobError>>,
        H: FnOnce(Vec<u8>) -> Result<T, JobError>,
    {
        let JobRequest {
            action,
            data,
            timeout,
            ..
        } = request;
        let reply = self.exchange(action, &data, timeout).await?;
        if let Body::Failure(err) = reply.body {
            return Ok(JobOutcome::Failed(err));
        }
        let bytes = process_result(reply).await?;
        Ok(JobOutcome::Completed(handle_success(bytes)?))
    }

    /// Exports a document to the given format.
    ///
    /// The artifact is named `file_name` when supplied, otherwise
    /// `<document_id>.<extension>`.
    pub async fn export_document(
        &self,
        document_id: &str,
        format: ExportFormat,
        file_name: Option<&str>,
    ) -> Result<JobOutcome<Artifact>, JobError> {
        let data = ExportDocumentRequest {
            document_id: document_id.to_owned(),
            page_range: None,
            include_annotations: false,
        };
        let name = file_name
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{document_id}.{}", format.extension()));
        self.run(JobRequest::new(format.action(), data).file_name(name))
            .await
    }

    /// Extracts the plain text of a document.
    ///
    /// `mime_type` hints at the source format; `None` lets the service
    /// sniff it.
    pub async fn extract_text(
        &self,
        document_id: &str,
        mime_type: Option<&str>,
    ) -> Result<JobOutcome<String>, JobError> {
        let data = ExtractTextRequest {
            document_id: document_id.to_owned(),
            mime_type: mime_type.unwrap_or_default().to_owned(),
        };
        let reply = self.exchange(Action::TextExtract, &data, None).await?;
        match reply.body {
            Body::Failure(err) => Ok(JobOutcome::Failed(err)),
            Body::Inline(bytes) => {
                let result: ExtractTextResult = self.connection.codec().decode_payload(&bytes)?;
                Ok(JobOutcome::Completed(result.text))
            }
            Body::Deferred(url) => {
                let bytes = self
                    .fetcher
                    .fetch(&url)
                    .await
                    .ok_or(JobError::AssetFetch { url })?;
                let text = String::from_utf8(bytes).map_err(|_| {
                    JobError::Decode(CodecError::Malformed("deferred text is not UTF-8".into()))
                })?;
                Ok(JobOutcome::Completed(text))
            }
            Body::Empty => Err(JobError::Decode(CodecError::Malformed(
                "text_extract reply carried no payload".into(),
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::{SinkExt, StreamExt};
    use scrivo_connection::{ConnectOptions, ConnectTarget};
    use scrivo_protocol::JsonCodec;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite;

    /// Starts a one-shot WebSocket job server driven by `script`.
    async fn job_server<F, Fut>(script: F) -> (String, tokio::task::JoinHandle<()>)
    where
        F: FnOnce(
                tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
            ) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://127.0.0.1:{}", listener.local_addr().unwrap().port());
        let handle = tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await
                && let Ok(ws) = tokio_tungstenite::accept_async(stream).await
            {
                script(ws).await;
            }
        });
        (url, handle)
    }

    /// Starts a mock HTTP server returning `status` with `body`.
    async fn blob_server(status: u16, body: Vec<u8>) -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://127.0.0.1:{}/blob1", listener.local_addr().unwrap().port());
        let handle = tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = vec![0u8; 8192];
                let _ = stream.read(&mut buf).await;
                let head = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes()).await;
                let _ = stream.write_all(&body).await;
                let _ = stream.shutdown().await;
            }
        });
        (url, handle)
    }

    async fn connected(url: String) -> Arc<Connection<JsonCodec>> {
        let conn = Arc::new(Connection::new(JsonCodec, ConnectOptions::default()));
        conn.open(&ConnectTarget::from(url)).await.unwrap();
        conn
    }

    fn dispatcher(conn: Arc<Connection<JsonCodec>>) -> Dispatcher<JsonCodec> {
        Dispatcher::new(conn, Arc::new(AssetFetcher::new().unwrap()))
    }

    /// Reads one request off the socket and returns its parsed JSON.
    async fn read_request(
        ws: &mut tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    ) -> serde_json::Value {
        loop {
            match ws.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).unwrap();
                }
                Some(Ok(tungstenite::Message::Ping(_))) | Some(Ok(tungstenite::Message::Pong(_))) => {}
                other => panic!("expected a text request, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn pdf_export_with_deferred_result_yields_named_artifact() {
        let pdf = b"%PDF-1.7 minimal".to_vec();
        let (blob_url, blob) = blob_server(200, pdf.clone()).await;

        let (url, server) = job_server(move |mut ws| async move {
            let request = read_request(&mut ws).await;
            assert_eq!(request["type"], "pdf_export");
            assert_eq!(request["payload"]["documentId"], "d1");
            let reply = serde_json::json!({
                "id": request["id"],
                "type": "pdf_export",
                "resultUrl": blob_url,
            });
            ws.send(tungstenite::Message::Text(reply.to_string().into()))
                .await
                .unwrap();
        })
        .await;

        let conn = connected(url).await;
        let outcome = dispatcher(conn.clone())
            .export_document("d1", ExportFormat::Pdf, Some("report.pdf"))
            .await
            .unwrap();

        let JobOutcome::Completed(artifact) = outcome else {
            panic!("expected a completed job");
        };
        assert_eq!(artifact.file_name, "report.pdf");
        assert_eq!(artifact.bytes, pdf);

        conn.close().await;
        server.await.unwrap();
        blob.await.unwrap();
    }

    #[tokio::test]
    async fn remote_decline_resolves_as_failed_outcome() {
        let (url, server) = job_server(|mut ws| async move {
            let request = read_request(&mut ws).await;
            let reply = serde_json::json!({
                "id": request["id"],
                "type": "pdf_export",
                "error": { "code": 422, "message": "conversion_failed" },
            });
            ws.send(tungstenite::Message::Text(reply.to_string().into()))
                .await
                .unwrap();
        })
        .await;

        let conn = connected(url).await;
        let outcome = dispatcher(conn.clone())
            .export_document("d1", ExportFormat::Pdf, None)
            .await
            .unwrap();

        let JobOutcome::Failed(err) = outcome else {
            panic!("expected a failed outcome, not a rejected call");
        };
        assert_eq!(err.message, "conversion_failed");
        assert_eq!(err.code, 422);

        conn.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connection_loss_mid_flight_rejects_with_connection_closed() {
        let (url, server) = job_server(|mut ws| async move {
            let _ = read_request(&mut ws).await;
            // Drop the socket without replying.
        })
        .await;

        let conn = connected(url).await;
        let result = dispatcher(conn.clone())
            .export_document("d1", ExportFormat::Pdf, None)
            .await;

        assert!(matches!(result, Err(JobError::ConnectionClosed)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn dispatch_before_open_fails_with_not_connected() {
        let conn = Arc::new(Connection::new(JsonCodec, ConnectOptions::default()));
        let result = dispatcher(conn)
            .export_document("d1", ExportFormat::Pdf, None)
            .await;
        assert!(matches!(result, Err(JobError::NotConnected)));
    }

    #[tokio::test]
    async fn silent_service_rejects_with_timeout() {
        let (url, _server) = job_server(|mut ws| async move {
            let _ = read_request(&mut ws).await;
            // Never reply; keep the socket open.
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let conn = connected(url).await;
        let result = dispatcher(conn.clone())
            .with_reply_timeout(Duration::from_millis(200))
            .export_document("d1", ExportFormat::Pdf, None)
            .await;

        assert!(matches!(result, Err(JobError::TimedOut)));
        // The abandoned wait left no registration behind.
        assert_eq!(conn.pending_waits(), 0);
        conn.close().await;
    }

    #[tokio::test]
    async fn extract_text_decodes_inline_reply() {
        let (url, server) = job_server(|mut ws| async move {
            let request = read_request(&mut ws).await;
            assert_eq!(request["type"], "text_extract");
            let reply = serde_json::json!({
                "id": request["id"],
                "type": "text_extract",
                "payload": { "text": "hello from d2" },
            });
            ws.send(tungstenite::Message::Text(reply.to_string().into()))
                .await
                .unwrap();
        })
        .await;

        let conn = connected(url).await;
        let outcome = dispatcher(conn.clone())
            .extract_text("d2", None)
            .await
            .unwrap();
        assert_eq!(outcome, JobOutcome::Completed("hello from d2".into()));

        conn.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn extract_text_forwards_the_mime_type_hint() {
        let (url, server) = job_server(|mut ws| async move {
            let request = read_request(&mut ws).await;
            assert_eq!(request["payload"]["mimeType"], "text/markdown");
            let reply = serde_json::json!({
                "id": request["id"],
                "type": "text_extract",
                "payload": { "text": "# heading" },
            });
            ws.send(tungstenite::Message::Text(reply.to_string().into()))
                .await
                .unwrap();
        })
        .await;

        let conn = connected(url).await;
        let outcome = dispatcher(conn.clone())
            .extract_text("d4", Some("text/markdown"))
            .await
            .unwrap();
        assert_eq!(outcome, JobOutcome::Completed("# heading".into()));

        conn.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn run_with_applies_caller_hooks() {
        let (url, server) = job_server(|mut ws| async move {
            let request = read_request(&mut ws).await;
            let reply = serde_json::json!({
                "id": request["id"],
                "type": "text_extract",
                "payload": { "text": "raw body", "truncated": false },
            });
            ws.send(tungstenite::Message::Text(reply.to_string().into()))
                .await
                .unwrap();
        })
        .await;

        let conn = connected(url).await;
        let request = JobRequest::new(
            Action::TextExtract,
            ExtractTextRequest {
                document_id: "d3".to_owned(),
                mime_type: String::new(),
            },
        );
        let outcome = dispatcher(conn.clone())
            .run_with(
                request,
                |reply| async move {
                    match reply.body {
                        Body::Inline(bytes) => Ok(bytes),
                        other => Err(JobError::Decode(CodecError::Malformed(format!(
                            "expected an inline body, got {other:?}"
                        )))),
                    }
                },
                |bytes| {
                    let result: ExtractTextResult = serde_json::from_slice(&bytes)
                        .map_err(|e| JobError::Decode(e.into()))?;
                    Ok(result.text.to_uppercase())
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome, JobOutcome::Completed("RAW BODY".to_owned()));
        conn.close().await;
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_asset_rejects_with_asset_fetch_failed() {
        let (blob_url, blob) = blob_server(404, b"gone".to_vec()).await;
        let (url, server) = job_server(move |mut ws| async move {
            let request = read_request(&mut ws).await;
            let reply = serde_json::json!({
                "id": request["id"],
                "type": "pdf_export",
                "resultUrl": blob_url,
            });
            ws.send(tungstenite::Message::Text(reply.to_string().into()))
                .await
                .unwrap();
        })
        .await;

        let conn = connected(url).await;
        let result = dispatcher(conn.clone())
            .export_document("d1", ExportFormat::Pdf, None)
            .await;

        // The job succeeded remotely; only the retrieval failed.
        assert!(matches!(result, Err(JobError::AssetFetch { .. })));

        conn.close().await;
        server.await.unwrap();
        blob.await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_same_action_jobs_resolve_independently() {
        let (url, server) = job_server(|mut ws| async move {
            // Collect both requests, then answer in reverse order with
            // an inline payload echoing each request's document id.
            let first = read_request(&mut ws).await;
            let second = read_request(&mut ws).await;
            for request in [second, first] {
                let reply = serde_json::json!({
                    "id": request["id"],
                    "type": "pdf_export",
                    "payload": { "documentId": request["payload"]["documentId"] },
                });
                ws.send(tungstenite::Message::Text(reply.to_string().into()))
                    .await
                    .unwrap();
            }
        })
        .await;

        let conn = connected(url).await;
        let dispatcher = dispatcher(conn.clone());

        let job = |doc: &'static str| {
            let data = ExportDocumentRequest {
                document_id: doc.to_owned(),
                page_range: None,
                include_annotations: false,
            };
            dispatcher.run(JobRequest::new(Action::PdfExport, data).file_name(doc))
        };

        let (a, b) = tokio::join!(job("d1"), job("d2"));
        let JobOutcome::Completed(a) = a.unwrap() else {
            panic!("first job should complete");
        };
        let JobOutcome::Completed(b) = b.unwrap() else {
            panic!("second job should complete");
        };

        // Despite identical actions and out-of-order replies, each call
        // got the reply for its own correlation id.
        assert!(String::from_utf8(a.bytes).unwrap().contains("d1"));
        assert!(String::from_utf8(b.bytes).unwrap().contains("d2"));

        conn.close().await;
        server.await.unwrap();
    }
}
