//! reqwest-backed fetcher.
//!
//! Issues a plain GET and reads the body as bytes, never as text, so any
//! content type round-trips exactly.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, REFERER};
use tracing::{debug, instrument};
use url::Url;

use super::{FetchError, FetchRequest, FetchResult, Fetcher};
use crate::config::FetchConfig;

/// Fetcher using a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    referer: Option<String>,
}

impl HttpFetcher {
    /// Build a fetcher from configuration.
    pub fn new(config: &FetchConfig) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(seconds) = config.timeout_seconds {
            builder = builder.timeout(Duration::from_secs(seconds));
        }
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        Ok(Self {
            client: builder.build()?,
            referer: config.referer.clone(),
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self), fields(url = %request.url))]
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult, FetchError> {
        let url = Url::parse(&request.url).map_err(|e| FetchError::InvalidUrl {
            url: request.url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl {
                url: request.url.clone(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        let mut req = self.client.get(url);
        if let Some(referer) = &self.referer {
            req = req.header(REFERER, referer);
        }

        let response = req.send().await.map_err(|source| FetchError::Request {
            url: request.url.clone(),
            source: source.into(),
        })?;

        let status = response.status().as_u16();
        let headers = header_pairs(response.headers());
        let body = response.bytes().await.map_err(|source| FetchError::Body {
            url: request.url.clone(),
            source: source.into(),
        })?;

        debug!(status, bytes = body.len(), "Fetch completed");

        Ok(FetchResult {
            status,
            headers,
            body,
        })
    }
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}
