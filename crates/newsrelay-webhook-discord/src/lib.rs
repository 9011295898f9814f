// # Discord Webhook Transport
//
// This crate provides the webhook transport for Discord-compatible
// endpoints (`POST` of an `{"embeds": [...]}` JSON body).
//
// ## Responsibilities
//
// - One HTTP request per call, nothing else
// - Map the answer onto the core error taxonomy
// - NO retry, NO sleeping on 429 (owned by `DeliveryClient`)
//
// ## Status Mapping
//
// | Answer                        | Result                                   |
// |-------------------------------|------------------------------------------|
// | 2xx                           | `Ok(())`                                 |
// | 429                           | `Error::DeliveryRateLimited`             |
// | any other status              | `Error::DeliveryHttp`                    |
// | no answer (connect, timeout)  | `Error::DeliveryUnexpected`              |
//
// The wait for a 429 comes from the `Retry-After` header (seconds, fractions
// allowed) or, failing that, the `retry_after` field of Discord's JSON body.
//
// ## Security
//
// Webhook URLs embed a secret token. They are never logged in full; see
// [`redact_webhook_url`].

use async_trait::async_trait;
use newsrelay_core::traits::WebhookTransport;
use newsrelay_core::{Error, Result, WebhookPayload};
use reqwest::StatusCode;
use std::time::Duration;

/// Default HTTP timeout for webhook requests (30 seconds)
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest error body kept in a `DeliveryHttp` message
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Discord-compatible webhook transport
///
/// # Dry-Run Mode
///
/// When `dry_run` is true, the transport logs the payload it would have
/// posted and reports success without sending anything.
#[derive(Debug, Clone)]
pub struct DiscordWebhook {
    /// HTTP client for webhook requests
    client: reqwest::Client,

    /// Dry-run mode: log instead of POST
    dry_run: bool,
}

impl DiscordWebhook {
    /// Create a new webhook transport
    ///
    /// # Parameters
    ///
    /// - `timeout`: Per-request HTTP timeout
    /// - `dry_run`: If true, log payloads instead of posting them
    pub fn new(timeout: Duration, dry_run: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, dry_run })
    }

    /// Create a live transport with the default timeout
    pub fn new_live() -> Result<Self> {
        Self::new(DEFAULT_HTTP_TIMEOUT, false)
    }

    /// Create a dry-run transport
    pub fn new_dry_run() -> Result<Self> {
        Self::new(DEFAULT_HTTP_TIMEOUT, true)
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

#[async_trait]
impl WebhookTransport for DiscordWebhook {
    async fn post(&self, webhook_url: &str, payload: &WebhookPayload) -> Result<()> {
        let target = redact_webhook_url(webhook_url);

        if self.dry_run {
            let body = serde_json::to_string(payload)?;
            tracing::info!("DRY-RUN: would POST to {}: {}", target, body);
            return Ok(());
        }

        let response = self
            .client
            .post(webhook_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                Error::delivery_unexpected(format!(
                    "POST to {} failed: {}",
                    target,
                    e.without_url()
                ))
            })?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!("Webhook {} accepted payload ({})", target, status);
            return Ok(());
        }

        let header_wait = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = header_wait.or_else(|| retry_after_from_body(&body));
            tracing::debug!("Webhook {} rate limited, retry after {:?}", target, retry_after);
            return Err(Error::rate_limited(retry_after));
        }

        Err(Error::delivery_http(
            status.as_u16(),
            truncate(body.trim(), MAX_ERROR_BODY_CHARS),
        ))
    }

    fn transport_name(&self) -> &'static str {
        "discord"
    }
}

/// Parse a `Retry-After` value given in seconds
///
/// Discord sends fractional seconds (`"1.5"`). The HTTP-date form is not
/// supported and yields `None`, as do negative or non-finite values. Values
/// too large for a `Duration` saturate; the delivery client caps the wait.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    seconds_to_duration(secs)
}

/// `retry_after` field of a Discord rate-limit body (seconds)
fn retry_after_from_body(body: &str) -> Option<Duration> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let secs = value.get("retry_after")?.as_f64()?;
    seconds_to_duration(secs)
}

fn seconds_to_duration(secs: f64) -> Option<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    Some(Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX))
}

/// Hide the secret part of a webhook URL for logging
///
/// The last path segment (Discord's webhook token) is replaced, as is any
/// query string: `https://discord.com/api/webhooks/123/<redacted>`.
pub fn redact_webhook_url(webhook_url: &str) -> String {
    let without_query = webhook_url.split(['?', '#']).next().unwrap_or_default();
    let trimmed = without_query.trim_end_matches('/');

    match trimmed.rfind('/') {
        // Keep "scheme://host" intact
        Some(index) if trimmed[..index].contains("//") && !trimmed[..index].ends_with('/') => {
            format!("{}/<redacted>", &trimmed[..index])
        }
        _ => trimmed.to_string(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsrelay_core::FeedItem;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn payload() -> WebhookPayload {
        let item = FeedItem {
            id: Some("news-1".to_string()),
            title: Some("Summer Update".to_string()),
            link: Some("https://store.example/news/1".to_string()),
            ..Default::default()
        };
        WebhookPayload::from_item(&item, 2000)
    }

    /// Answer one request with a canned response; yields the raw request
    async fn serve_once(response: String) -> (SocketAddr, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut chunk = [0u8; 4096];

            // Read headers, then the body announced by Content-Length
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&raw);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= end + 4 + length {
                        break;
                    }
                }
            }

            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            let _ = tx.send(String::from_utf8_lossy(&raw).to_string());
        });

        (addr, rx)
    }

    fn http_response(status_line: &str, headers: &[&str], body: &str) -> String {
        let mut response = format!("HTTP/1.1 {}\r\n", status_line);
        for header in headers {
            response.push_str(header);
            response.push_str("\r\n");
        }
        response.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        ));
        response
    }

    fn transport() -> DiscordWebhook {
        DiscordWebhook::new(Duration::from_secs(5), false).unwrap()
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_retry_after(" 1.5 "), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after("-1"), None);
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(parse_retry_after("inf"), None);
    }

    #[test]
    fn test_huge_retry_after_saturates() {
        assert_eq!(parse_retry_after("1e30"), Some(Duration::MAX));
        assert_eq!(
            retry_after_from_body(r#"{"retry_after": 1e30}"#),
            Some(Duration::MAX)
        );
    }

    #[test]
    fn test_retry_after_from_body() {
        assert_eq!(
            retry_after_from_body(r#"{"message": "You are being rate limited.", "retry_after": 0.25, "global": false}"#),
            Some(Duration::from_millis(250))
        );
        assert_eq!(retry_after_from_body("not json"), None);
    }

    #[test]
    fn test_redact_webhook_url() {
        assert_eq!(
            redact_webhook_url("https://discord.com/api/webhooks/123/s3cr3t-token"),
            "https://discord.com/api/webhooks/123/<redacted>"
        );
        assert_eq!(
            redact_webhook_url("https://hooks.example/abc?wait=true"),
            "https://hooks.example/<redacted>"
        );
        assert_eq!(redact_webhook_url("https://hooks.example"), "https://hooks.example");
    }

    #[tokio::test]
    async fn test_success_posts_embed_json() {
        let (addr, request_rx) = serve_once(http_response("204 No Content", &[], "")).await;

        transport()
            .post(&format!("http://{}/api/webhooks/1/token", addr), &payload())
            .await
            .unwrap();

        let request = request_rx.await.unwrap();
        assert!(request.starts_with("POST /api/webhooks/1/token"));
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
        assert!(request.contains(r#""embeds":[{"title":"Summer Update""#));
    }

    #[tokio::test]
    async fn test_rate_limit_uses_retry_after_header() {
        let (addr, _request_rx) = serve_once(http_response(
            "429 Too Many Requests",
            &["Retry-After: 10"],
            "",
        ))
        .await;

        let err = transport()
            .post(&format!("http://{}/hook", addr), &payload())
            .await
            .unwrap_err();

        match err {
            Error::DeliveryRateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(10)))
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rate_limit_falls_back_to_body() {
        let (addr, _request_rx) = serve_once(http_response(
            "429 Too Many Requests",
            &["Content-Type: application/json"],
            r#"{"retry_after": 2.5}"#,
        ))
        .await;

        let err = transport()
            .post(&format!("http://{}/hook", addr), &payload())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::DeliveryRateLimited { retry_after: Some(wait) } if wait == Duration::from_millis(2500)
        ));
    }

    #[tokio::test]
    async fn test_huge_retry_after_header_is_reported() {
        let (addr, _request_rx) = serve_once(http_response(
            "429 Too Many Requests",
            &["Retry-After: 1e30"],
            "",
        ))
        .await;

        let err = transport()
            .post(&format!("http://{}/hook", addr), &payload())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::DeliveryRateLimited { retry_after: Some(wait) } if wait == Duration::MAX
        ));
    }

    #[tokio::test]
    async fn test_server_error_is_http_error() {
        let (addr, _request_rx) = serve_once(http_response(
            "500 Internal Server Error",
            &[],
            "upstream exploded",
        ))
        .await;

        let err = transport()
            .post(&format!("http://{}/hook", addr), &payload())
            .await
            .unwrap_err();

        match err {
            Error::DeliveryHttp { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "upstream exploded");
            }
            other => panic!("expected HTTP error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_unexpected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = transport()
            .post(&format!("http://{}/api/webhooks/1/s3cr3t", addr), &payload())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::DeliveryUnexpected(_)));
        assert!(!err.to_string().contains("s3cr3t"), "token leaked: {}", err);
    }

    #[tokio::test]
    async fn test_dry_run_sends_nothing() {
        let transport = DiscordWebhook::new_dry_run().unwrap();
        assert!(transport.is_dry_run());

        // Nothing listens here; a real POST would fail
        transport
            .post("http://127.0.0.1:9/api/webhooks/1/token", &payload())
            .await
            .unwrap();
    }
}
