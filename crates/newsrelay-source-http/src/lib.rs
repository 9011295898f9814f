// # HTTP Feed Source
//
// This crate provides the HTTP feed source for the relay.
//
// ## Architecture
//
// One GET per call to the per-entity feed URL (built from
// `SourceConfig::feed_url_template`), parsed with `feed-rs`, which accepts
// RSS 0.9x/1.0/2.0, Atom and JSON Feed.
//
// The source is single-shot: no retry, no backoff, no caching. A failed
// fetch is reported to the feed worker, which owns the backoff.
//
// ## Error Mapping
//
// - Connection/timeout/body errors, non-2xx status, oversized body:
//   `Error::FetchTransport`
// - Unparseable document: `Error::FeedParse` with the parser error attached

use async_trait::async_trait;
use feed_rs::model::Entry;
use newsrelay_core::config::SourceConfig;
use newsrelay_core::traits::FeedSource;
use newsrelay_core::{Error, FeedItem, Result};
use std::time::Duration;

/// Largest feed document accepted (5 MiB)
const MAX_FEED_SIZE: u64 = 5 * 1024 * 1024;

/// Connect timeout for feed requests
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum number of redirects to follow
const MAX_REDIRECTS: usize = 5;

/// HTTP + RSS/Atom feed source
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    /// Per-entity URL template
    config: SourceConfig,

    /// HTTP client
    client: reqwest::Client,
}

impl HttpFeedSource {
    /// Create a new HTTP feed source
    ///
    /// # Parameters
    ///
    /// - `config`: URL template, timeout and user agent
    ///
    /// # Errors
    ///
    /// `Error::Config` if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: SourceConfig) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// Feed URL for one entity
    pub fn feed_url(&self, entity_id: &str) -> String {
        self.config.feed_url(entity_id)
    }

    async fn fetch_body(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::fetch_transport(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch_transport(format!(
                "GET {} returned HTTP {}",
                url, status
            )));
        }

        if let Some(length) = response.content_length()
            && length > MAX_FEED_SIZE
        {
            return Err(Error::fetch_transport(format!(
                "Feed too large: {} bytes (max {} bytes)",
                length, MAX_FEED_SIZE
            )));
        }

        let bytes = response.bytes().await.map_err(|e| {
            Error::fetch_transport(format!("Failed to read feed body from {}: {}", url, e))
        })?;

        if bytes.len() as u64 > MAX_FEED_SIZE {
            return Err(Error::fetch_transport(format!(
                "Feed too large: {} bytes (max {} bytes)",
                bytes.len(),
                MAX_FEED_SIZE
            )));
        }

        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, entity_id: &str) -> Result<Vec<FeedItem>> {
        let url = self.feed_url(entity_id);
        tracing::debug!("Fetching feed for {} from {}", entity_id, url);

        let body = self.fetch_body(&url).await?;
        parse_feed(entity_id, &body)
    }

    fn source_name(&self) -> &'static str {
        "http"
    }
}

/// Parse a syndication document into feed items, in document order
///
/// Entries without an explicit id get none: the dedup key then falls back
/// to the link rather than to an id synthesized from link and title.
pub fn parse_feed(entity_id: &str, body: &[u8]) -> Result<Vec<FeedItem>> {
    let parser = feed_rs::parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build();
    let feed = parser
        .parse(body)
        .map_err(|e| Error::feed_parse(entity_id, e))?;
    Ok(feed.entries.into_iter().map(entry_to_item).collect())
}

fn entry_to_item(entry: Entry) -> FeedItem {
    let link = entry.links.first().map(|link| link.href.clone());
    let description_html = entry
        .summary
        .map(|text| text.content)
        .or_else(|| entry.content.and_then(|content| content.body));

    FeedItem {
        id: Some(entry.id).filter(|id| !id.trim().is_empty()),
        title: entry.title.map(|text| text.content),
        link,
        published: entry.published.or(entry.updated),
        description_html,
    }
}
