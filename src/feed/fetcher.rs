use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::parser::parse_document;
use super::types::{Channel, FeedDocument, Item};

/// Default deadline for one fetch, independent of the poll interval.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const USER_AGENT: &str = concat!("rss-relay/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur during one fetch-and-parse cycle.
///
/// `Network`, `HttpStatus`, `Timeout`, `ResponseTooLarge` and
/// `IncompleteResponse` are transport failures; `Parse` means the body was
/// not a usable feed; `NoItemsFound` is the expected "nothing to do" outcome.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The caller's cancellation token fired before or during the request
    #[error("fetch cancelled")]
    Cancelled,
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the fetch deadline
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Body could not be decoded as a feed
    #[error("Parse error: {0}")]
    Parse(String),
    /// The feed decoded fine but contains no items
    #[error("no items found")]
    NoItemsFound,
}

impl FetchError {
    /// True for transport-level failures (network, status, deadline, size).
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_)
                | FetchError::HttpStatus(_)
                | FetchError::Timeout
                | FetchError::ResponseTooLarge
                | FetchError::IncompleteResponse { .. }
        )
    }

    /// True for outcomes that are part of normal operation and need no attention.
    pub fn is_expected(&self) -> bool {
        matches!(self, FetchError::NoItemsFound | FetchError::Cancelled)
    }
}

/// Builds the HTTP client shared by every feed loop.
pub fn build_http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
}

/// Fetches a feed and returns its channel metadata and items in document order.
///
/// # Errors
///
/// - [`FetchError::Cancelled`] if `cancel` is already set or fires mid-request
/// - transport errors for network, non-2xx, deadline or size problems
/// - [`FetchError::Parse`] for bodies that are not a feed
/// - [`FetchError::NoItemsFound`] if the feed has no items
pub async fn fetch_once(
    client: &reqwest::Client,
    url: &str,
    cancel: &CancellationToken,
    timeout: Duration,
) -> Result<(Channel, Vec<Item>), FetchError> {
    let document = fetch_document(client, url, cancel, timeout).await?;
    if document.items.is_empty() {
        return Err(FetchError::NoItemsFound);
    }
    Ok((document.channel, document.items))
}

/// Fetches a feed for its channel metadata only. An empty feed is not an error here.
pub async fn fetch_channel(
    client: &reqwest::Client,
    url: &str,
    cancel: &CancellationToken,
    timeout: Duration,
) -> Result<Channel, FetchError> {
    fetch_document(client, url, cancel, timeout)
        .await
        .map(|document| document.channel)
}

async fn fetch_document(
    client: &reqwest::Client,
    url: &str,
    cancel: &CancellationToken,
    timeout: Duration,
) -> Result<FeedDocument, FetchError> {
    if cancel.is_cancelled() {
        return Err(FetchError::Cancelled);
    }

    let bytes = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        result = tokio::time::timeout(timeout, download(client, url)) => {
            result.map_err(|_| FetchError::Timeout)??
        }
    };

    parse_document(&bytes).map_err(FetchError::Parse)
}

async fn download(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, FetchError> {
    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            FetchError::Timeout
        } else {
            FetchError::Network(e)
        }
    })?;

    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    read_limited_bytes(response, MAX_FEED_SIZE).await
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Capture Content-Length for completeness check
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Test Channel</title>
    <item><guid>1</guid><title>Test</title><pubDate>Mon, 02 Jan 2006 15:04:05 MST</pubDate></item>
</channel></rss>"#;

    const EMPTY_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>Quiet</title></channel></rss>"#;

    async fn serve(status: u16, body: &str) -> MockServer {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(
                ResponseTemplate::new(status)
                    .set_body_string(body)
                    .insert_header("Content-Type", "application/rss+xml"),
            )
            .mount(&mock_server)
            .await;
        mock_server
    }

    fn client() -> reqwest::Client {
        build_http_client(DEFAULT_FETCH_TIMEOUT).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_once_success() {
        let server = serve(200, VALID_RSS).await;
        let url = format!("{}/feed", server.uri());

        let (channel, items) = fetch_once(&client(), &url, &CancellationToken::new(), DEFAULT_FETCH_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(channel.title, "Test Channel");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].guid, "1");
        assert!(items[0].pub_time.is_some());
    }

    #[tokio::test]
    async fn test_fetch_once_404() {
        let server = serve(404, "").await;
        let url = format!("{}/feed", server.uri());

        let err = fetch_once(&client(), &url, &CancellationToken::new(), DEFAULT_FETCH_TIMEOUT)
            .await
            .unwrap_err();
        match err {
            FetchError::HttpStatus(404) => {}
            e => panic!("Expected HttpStatus(404), got {:?}", e),
        }
        assert!(FetchError::HttpStatus(404).is_fetch_failure());
    }

    #[tokio::test]
    async fn test_fetch_once_does_not_retry() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        let result = fetch_once(&client(), &url, &CancellationToken::new(), DEFAULT_FETCH_TIMEOUT).await;
        assert!(matches!(result, Err(FetchError::HttpStatus(503))));
    }

    #[tokio::test]
    async fn test_malformed_feed_parse_error() {
        let server = serve(200, "<not valid xml").await;
        let url = format!("{}/feed", server.uri());

        let result = fetch_once(&client(), &url, &CancellationToken::new(), DEFAULT_FETCH_TIMEOUT).await;
        match result {
            Err(FetchError::Parse(_)) => {}
            other => panic!("Expected Parse error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_feed_no_items() {
        let server = serve(200, EMPTY_RSS).await;
        let url = format!("{}/feed", server.uri());

        let result = fetch_once(&client(), &url, &CancellationToken::new(), DEFAULT_FETCH_TIMEOUT).await;
        assert!(matches!(result, Err(FetchError::NoItemsFound)));
        assert!(FetchError::NoItemsFound.is_expected());
    }

    #[tokio::test]
    async fn test_fetch_channel_allows_empty_feed() {
        let server = serve(200, EMPTY_RSS).await;
        let url = format!("{}/feed", server.uri());

        let channel = fetch_channel(&client(), &url, &CancellationToken::new(), DEFAULT_FETCH_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(channel.title, "Quiet");
    }

    #[tokio::test]
    async fn test_cancelled_before_request() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(0)
            .mount(&mock_server)
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();

        let url = format!("{}/feed", mock_server.uri());
        let result = fetch_once(&client(), &url, &cancel, DEFAULT_FETCH_TIMEOUT).await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancelled_mid_request() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let url = format!("{}/feed", mock_server.uri());
        let result = fetch_once(&client(), &url, &cancel, DEFAULT_FETCH_TIMEOUT).await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&mock_server)
            .await;

        let url = format!("{}/feed", mock_server.uri());
        let result = fetch_once(
            &client(),
            &url,
            &CancellationToken::new(),
            Duration::from_millis(100),
        )
        .await;
        assert!(matches!(result, Err(FetchError::Timeout)));
    }
}
