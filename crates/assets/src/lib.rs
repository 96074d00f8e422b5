//! Out-of-band retrieval of binary job results.
//!
//! Large artifacts never travel over the job socket; the service
//! uploads them and replies with a URL, and this crate pulls the bytes
//! down over plain HTTP.

use std::time::Duration;

use tracing::{debug, warn};

/// Default per-request timeout, covering connect and body transfer.
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from asset retrieval.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),
}

/// HTTP fetcher for deferred job results.
///
/// Holds a pooled client, so one fetcher should be shared across all
/// dispatch paths rather than built per call.
pub struct AssetFetcher {
    http: reqwest::Client,
}

impl AssetFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Downloads the asset at `url`, returning `None` on any failure.
    ///
    /// Result URLs are short-lived and jobs are user-initiated, so
    /// failures are logged and surfaced as absence rather than retried.
    pub async fn fetch(&self, url: &str) -> Option<Vec<u8>> {
        match self.try_fetch(url).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(url, "asset fetch failed: {e}");
                None
            }
        }
    }

    /// Downloads the asset at `url`.
    ///
    /// Any non-2xx status is an error; redirects are followed by the
    /// client before the status is inspected.
    pub async fn try_fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let bytes = response.bytes().await?;
        debug!(url, len = bytes.len(), "fetched asset");
        Ok(bytes.to_vec())
    }
}
