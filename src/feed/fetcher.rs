use crate::feed::parser::{ParseError, RowParser};
use crate::report::RawReport;
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

/// Default request timeout for a single feed.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default per-feed response ceiling.
pub const DEFAULT_MAX_FEED_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching one feed.
///
/// Fetches are never retried at this layer; the first failure is returned.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, dropped body stream)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Body was not well-formed CSV
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

/// Per-request limits applied to every feed fetch.
#[derive(Debug, Clone, Copy)]
pub struct FeedLimits {
    pub timeout: Duration,
    pub max_bytes: usize,
}

impl Default for FeedLimits {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_bytes: DEFAULT_MAX_FEED_BYTES,
        }
    }
}

/// Fetches one feed and decodes it into rows.
///
/// The body is streamed: each chunk goes straight into the row parser, so
/// parsing overlaps the transfer and the whole payload is never buffered.
///
/// # Errors
///
/// - [`FetchError::Timeout`] - no response within `limits.timeout`
/// - [`FetchError::Network`] - connection errors or a body stream that broke off
/// - [`FetchError::HttpStatus`] - non-2xx response
/// - [`FetchError::ResponseTooLarge`] - body exceeded `limits.max_bytes`
/// - [`FetchError::IncompleteResponse`] - fewer bytes than Content-Length announced
/// - [`FetchError::Parse`] - malformed CSV; rows parsed so far are discarded
pub async fn fetch_reports(
    client: &reqwest::Client,
    url: &str,
    limits: FeedLimits,
) -> Result<Vec<RawReport>, FetchError> {
    let response = tokio::time::timeout(limits.timeout, client.get(url).send())
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(FetchError::Network)?;

    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    let expected_length = response.content_length();
    if let Some(len) = expected_length {
        if len > limits.max_bytes as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut parser = RowParser::new();
    let mut rows = Vec::new();
    let mut received: usize = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        received = received.saturating_add(chunk.len());
        if received > limits.max_bytes {
            return Err(FetchError::ResponseTooLarge);
        }
        rows.extend(parser.push(&chunk)?);
    }

    if let Some(expected) = expected_length {
        if (received as u64) < expected {
            return Err(FetchError::IncompleteResponse { expected, received });
        }
    }

    rows.extend(parser.finish()?);

    tracing::debug!(url = %url, bytes = received, rows = rows.len(), "Fetched feed");
    Ok(rows)
}
