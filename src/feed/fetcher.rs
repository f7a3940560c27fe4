use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;

/// Transport-level failures while retrieving raw feed content.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection refused, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    #[error("Response too large")]
    ResponseTooLarge,
    /// Received fewer bytes than Content-Length announced
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// Fallback requested but no proxy is configured
    #[error("No proxy configured for fallback fetch")]
    NoProxy,
}

/// The two retrieval paths the refresh loop may use for a feed.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the document directly from its source URL.
    async fn fetch_raw(&self, url: &str) -> Result<Vec<u8>, FetchError>;

    /// Fetch the same document through the alternate (proxy) path.
    async fn fetch_via_proxy(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// `reqwest`-backed [`FeedSource`].
///
/// The proxy path prefixes the feed URL with a configured base, so
/// `https://proxy.example/api/` + `http://x/feed` is requested verbatim.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    proxy_base: Option<String>,
    timeout: Duration,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("feedshelf/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            proxy_base: config
                .proxy_url
                .as_deref()
                .map(str::trim)
                .filter(|base| !base.is_empty())
                .map(str::to_owned),
            timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
            max_bytes: config.max_feed_bytes,
        }
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let parsed = url::Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, self.client.get(parsed).send())
            .await
            .map_err(|_| FetchError::Timeout)??;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        tokio::time::timeout(self.timeout, read_limited_bytes(response, self.max_bytes))
            .await
            .map_err(|_| FetchError::Timeout)?
    }
}

#[async_trait]
impl FeedSource for HttpFetcher {
    async fn fetch_raw(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.get(url).await
    }

    async fn fetch_via_proxy(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let base = self.proxy_base.as_deref().ok_or(FetchError::NoProxy)?;
        let proxied = format!("{}{}", base, url);
        tracing::debug!(url = %url, proxied = %proxied, "Fetching through proxy");
        self.get(&proxied).await
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
