use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

use super::envelope::Envelope;
use super::{PublishError, Publisher};
use crate::feed::{Channel, Item};

/// Attempts per item before giving up.
pub const DEFAULT_ATTEMPTS: u32 = 3;
/// Deadline for one delivery attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_BACKOFF_STEP: Duration = Duration::from_secs(1);

/// Publishes envelopes as JSON over HTTP POST.
///
/// Transient failures (timeouts, network errors, 5xx, 429) are retried with
/// linear backoff: 1s after the first failure, 2s after the second, and so on.
#[derive(Debug)]
pub struct HttpPublisher {
    client: reqwest::Client,
    endpoint: String,
    token: Option<SecretString>,
    attempts: u32,
    attempt_timeout: Duration,
    backoff_step: Duration,
}

impl HttpPublisher {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            token: None,
            attempts: DEFAULT_ATTEMPTS,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            backoff_step: DEFAULT_BACKOFF_STEP,
        }
    }

    /// Sends `Authorization: Bearer <token>` with every request.
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_retry(mut self, attempts: u32, backoff_step: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff_step = backoff_step;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Checks that the endpoint answers at all. Any HTTP status counts as reachable.
    pub async fn ping(&self) -> Result<(), PublishError> {
        let request = self.authorize(self.client.head(&self.endpoint));
        let response = tokio::time::timeout(self.attempt_timeout, request.send())
            .await
            .map_err(|_| PublishError::Timeout)??;
        tracing::debug!(
            endpoint = %self.endpoint,
            status = response.status().as_u16(),
            "Publisher reachable"
        );
        Ok(())
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn post(&self, body: &[u8]) -> Result<(), PublishError> {
        let request = self
            .authorize(self.client.post(&self.endpoint))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec());

        let response = tokio::time::timeout(self.attempt_timeout, request.send())
            .await
            .map_err(|_| PublishError::Timeout)?
            .map_err(|e| {
                if e.is_timeout() {
                    PublishError::Timeout
                } else {
                    PublishError::Network(e)
                }
            })?;

        if !response.status().is_success() {
            return Err(PublishError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn deliver(
        &self,
        item: &Item,
        channel: &Channel,
        is_testing: bool,
        feed_code: &str,
    ) -> Result<(), PublishError> {
        let body = serde_json::to_vec(&Envelope::new(item, channel, is_testing, feed_code))?;
        let mut attempt = 1;

        loop {
            match self.post(&body).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    let delay = self.backoff_step * attempt;
                    tracing::warn!(
                        guid = %item.guid,
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying delivery after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    return Err(PublishError::RetriesExhausted {
                        attempts: attempt,
                        last: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn item() -> Item {
        Item {
            guid: "g1".into(),
            title: "Headline".into(),
            ..Default::default()
        }
    }

    fn channel() -> Channel {
        Channel {
            title: "Test Channel".into(),
            ..Default::default()
        }
    }

    fn publisher(server: &MockServer) -> HttpPublisher {
        HttpPublisher::new(reqwest::Client::new(), format!("{}/ingest", server.uri()))
            .with_retry(DEFAULT_ATTEMPTS, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_deliver_posts_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ingest"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(serde_json::json!({
                "newsItem": { "guid": "g1", "title": "Headline" },
                "channel": { "title": "Test Channel", "code": "rv" },
                "isTesting": false,
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        publisher(&server)
            .deliver(&item(), &channel(), false, "rv")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bearer_token_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer s3cret"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        publisher(&server)
            .with_token(SecretString::from("s3cret"))
            .deliver(&item(), &channel(), true, "rv")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_retries_then_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let err = publisher(&server)
            .deliver(&item(), &channel(), false, "rv")
            .await
            .unwrap_err();
        match err {
            PublishError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
            e => panic!("Expected RetriesExhausted, got {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        publisher(&server)
            .deliver(&item(), &channel(), false, "rv")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let err = publisher(&server)
            .deliver(&item(), &channel(), false, "rv")
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::HttpStatus(400)));
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let err = publisher(&server)
            .with_retry(1, Duration::from_millis(10))
            .with_attempt_timeout(Duration::from_millis(100))
            .deliver(&item(), &channel(), false, "rv")
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::RetriesExhausted { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn test_ping() {
        let server = MockServer::start().await;
        // Unmatched requests get a 404, which still proves the endpoint is up.
        publisher(&server).ping().await.unwrap();

        let unreachable = HttpPublisher::new(reqwest::Client::new(), "http://127.0.0.1:1/ingest");
        assert!(unreachable.ping().await.is_err());
    }
}
