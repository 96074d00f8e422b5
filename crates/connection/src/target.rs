//! Connection target: a literal URL or a deferred resolver.
//!
//! Resolvers let the caller build credential-bearing URLs at the moment
//! of connection (e.g. appending a fresh auth token as a query
//! parameter) instead of at configuration time.

use std::future::Future;
use std::pin::Pin;

/// The target address could not be produced.
#[derive(Debug, thiserror::Error)]
#[error("target resolution failed: {0}")]
pub struct TargetError(pub String);

type ResolveFuture = Pin<Box<dyn Future<Output = Result<String, TargetError>> + Send>>;

/// Where to connect. Resolvers are invoked once per connect attempt.
pub enum ConnectTarget {
    /// A fixed WebSocket URL.
    Url(String),
    /// A closure producing the URL at connect time. A synchronous
    /// resolver is just a closure returning a ready future.
    Resolver(Box<dyn Fn() -> ResolveFuture + Send + Sync>),
}

impl ConnectTarget {
    /// Creates a literal target.
    pub fn url(url: impl Into<String>) -> Self {
        ConnectTarget::Url(url.into())
    }

    /// Creates a deferred target from an async closure.
    pub fn resolver<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, TargetError>> + Send + 'static,
    {
        ConnectTarget::Resolver(Box::new(move || Box::pin(f())))
    }

    /// Produces the URL for one connect attempt.
    pub(crate) async fn resolve(&self) -> Result<String, TargetError> {
        match self {
            ConnectTarget::Url(url) => Ok(url.clone()),
            ConnectTarget::Resolver(f) => f().await,
        }
    }
}

impl From<&str> for ConnectTarget {
    fn from(url: &str) -> Self {
        ConnectTarget::url(url)
    }
}

impl From<String> for ConnectTarget {
    fn from(url: String) -> Self {
        ConnectTarget::Url(url)
    }
}

impl std::fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectTarget::Url(url) => f.debug_tuple("Url").field(url).finish(),
            ConnectTarget::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}
