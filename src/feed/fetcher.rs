use futures::StreamExt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::feed::parser::{parse_rss, ParseError, RssFeed};

/// Identifies gator to feed servers
pub const USER_AGENT: &str = "gator";

/// Default bound on a single fetch (headers and body)
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching a feed.
///
/// `Parse` means the server answered but the document is unusable; every
/// other variant means the feed could not be retrieved at all.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// The fetch did not complete within the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Body is not a valid RSS document
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

impl FetchError {
    /// Feed unreachable: nothing usable came back
    pub fn is_network(&self) -> bool {
        !self.is_parse()
    }

    /// Feed reachable but malformed
    pub fn is_parse(&self) -> bool {
        matches!(self, FetchError::Parse(_))
    }
}

/// Retrieves and decodes feed documents.
///
/// The ingestion cycle is written against this trait so tests can serve
/// canned documents without a network.
pub trait FeedSource {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<RssFeed, FetchError>> + Send;
}

/// `FeedSource` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// GET the feed and read the whole body.
    ///
    /// Status is checked before the body is read; redirects follow the
    /// client defaults.
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        read_limited_bytes(response, MAX_FEED_SIZE).await
    }
}

impl FeedSource for HttpFetcher {
    /// Fetch and parse one feed, bounded by the fetcher's timeout.
    ///
    /// Expiry drops the in-flight request and reports `FetchError::Timeout`.
    async fn fetch(&self, url: &str) -> Result<RssFeed, FetchError> {
        let bytes = tokio::time::timeout(self.timeout, self.fetch_bytes(url))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))??;

        let feed = parse_rss(&bytes)?;
        tracing::debug!(
            url = %url,
            bytes = bytes.len(),
            items = feed.channel.items.len(),
            "Fetched feed"
        );
        Ok(feed)
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
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

    Ok(bytes)
}
