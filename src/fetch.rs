//! Fetch capability trait and implementations.
//!
//! A fetcher retrieves one target resource and hands back its status,
//! headers, and raw body. Any completed HTTP exchange is a success, whatever
//! the status code; only failures before a response exists are errors.

mod http;

pub use http::HttpFetcher;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// A single fetch command, created from a SCRAPE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Target URL, as received from the controller.
    pub url: String,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Outcome of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    /// HTTP status code, 2xx or not.
    pub status: u16,
    /// Response headers in received order; repeated names stay repeated.
    pub headers: Vec<(String, String)>,
    /// Uninterpreted response body.
    pub body: Bytes,
}

/// Boxed underlying cause of a fetch failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures that leave no response to report.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid target url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("reading body from {url} failed: {source}")]
    Body {
        url: String,
        #[source]
        source: BoxError,
    },
}

/// Trait for fetch backends.
///
/// Implementations must be usable from many concurrent fetch tasks.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieve the target resource.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, FetchError>;
}
