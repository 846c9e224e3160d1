use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info};

use super::Transport;
use crate::config::{Dsn, CLIENT_NAME};
use crate::error::{FaultlineError, Result};
use crate::protocol::Envelope;

/// Configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub dsn: Dsn,
    pub timeout: Option<Duration>,
    pub user_agent: String,
}

impl HttpTransportConfig {
    pub fn new(dsn: Dsn) -> Self {
        Self {
            dsn,
            timeout: Some(Duration::from_secs(10)),
            user_agent: CLIENT_NAME.to_string(),
        }
    }
}

/// Delivers envelopes to the project's envelope endpoint over HTTP(S).
pub struct HttpTransport {
    client: Client,
    config: HttpTransportConfig,
    url: String,
    auth: String,
}

impl HttpTransport {
    pub fn new(dsn: Dsn) -> Result<Self> {
        Self::with_config(HttpTransportConfig::new(dsn))
    }

    pub fn with_config(config: HttpTransportConfig) -> Result<Self> {
        let mut client_builder = Client::builder().user_agent(config.user_agent.clone());

        if let Some(timeout) = config.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        let client = client_builder.build()?;
        let url = config.dsn.envelope_url();
        let auth = config.dsn.auth_header(&config.user_agent);

        info!("HTTP transport targeting {}", url);

        Ok(Self {
            client,
            config,
            url,
            auth,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.url
    }

    pub fn dsn(&self) -> &Dsn {
        &self.config.dsn
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, envelope: &Envelope) -> Result<()> {
        let body = envelope.to_bytes()?;
        debug!("Sending envelope {} ({} bytes)", envelope.event_id(), body.len());

        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/x-sentry-envelope")
            .header("X-Sentry-Auth", &self.auth)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let retry_after = parse_retry_after(response.headers());
        let message = format!(
            "HTTP {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        );

        Err(FaultlineError::TransportError {
            message,
            retryable: is_retryable_status(status),
            retry_after,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Event, EnvelopeItem};
    use crate::transport::retry::{retry, RetryConfig};
    use reqwest::header::HeaderValue;

    fn transport_for(server: &mockito::Server) -> HttpTransport {
        let dsn = Dsn::parse(&format!("{}/1", server.url().replacen("://", "://testkey@", 1))).unwrap();
        HttpTransport::new(dsn).unwrap()
    }

    fn envelope() -> Envelope {
        Envelope::new(EnvelopeItem::Event(Event {
            message: Some("Connection refused".to_string()),
            ..Default::default()
        }))
    }

    #[test]
    fn test_endpoint_from_dsn() {
        let dsn = Dsn::parse("https://abc@errors.example.com/9").unwrap();
        let transport = HttpTransport::new(dsn).unwrap();
        assert_eq!(transport.endpoint(), "https://errors.example.com/api/9/envelope/");
        assert_eq!(transport.name(), "http");
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(30)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[tokio::test]
    async fn test_send_success_sets_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/1/envelope/")
            .match_header("content-type", "application/x-sentry-envelope")
            .match_header(
                "x-sentry-auth",
                mockito::Matcher::Regex("sentry_key=testkey".to_string()),
            )
            .match_body(mockito::Matcher::Regex("Connection refused".to_string()))
            .with_status(200)
            .with_body(r#"{"id":"ok"}"#)
            .create_async()
            .await;

        let transport = transport_for(&server);
        let result = transport.send(&envelope()).await;

        mock.assert_async().await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_client_error_is_permanent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/1/envelope/")
            .with_status(400)
            .expect(1)
            .create_async()
            .await;

        let transport = transport_for(&server);
        let cfg = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
            jitter: false,
        };
        let env = envelope();
        let result = retry(&cfg, || transport.send(&env)).await;

        mock.assert_async().await;
        match result {
            Err(FaultlineError::TransportError { retryable, .. }) => assert!(!retryable),
            other => panic!("Expected permanent TransportError, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/1/envelope/")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let transport = transport_for(&server);
        let cfg = RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
            jitter: false,
        };
        let env = envelope();
        let result = retry(&cfg, || transport.send(&env)).await;

        mock.assert_async().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_rate_limit_carries_retry_after() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/1/envelope/")
            .with_status(429)
            .with_header("retry-after", "2")
            .create_async()
            .await;

        let transport = transport_for(&server);
        match transport.send(&envelope()).await {
            Err(FaultlineError::TransportError {
                retryable,
                retry_after,
                ..
            }) => {
                assert!(retryable);
                assert_eq!(retry_after, Some(Duration::from_secs(2)));
            }
            other => panic!("Expected TransportError, got {:?}", other),
        }
    }
}
