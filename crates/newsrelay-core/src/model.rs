//! Data model shared by the registry, workers and stores

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable definition of one monitored feed
///
/// Keyed by `entity_id`; the definitions store holds at most one per id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedDefinition {
    /// Operator-chosen entity identifier (e.g. a Steam app id)
    pub entity_id: String,
    /// Destination webhook for this feed
    pub webhook_url: String,
}

impl FeedDefinition {
    /// Create a new feed definition
    pub fn new(entity_id: impl Into<String>, webhook_url: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            webhook_url: webhook_url.into(),
        }
    }
}

/// A single entry parsed from one poll response
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FeedItem {
    /// Explicit identifier from the feed (guid / atom id)
    pub id: Option<String>,
    /// Entry title
    pub title: Option<String>,
    /// Canonical link
    pub link: Option<String>,
    /// Publication date, if the feed carried one
    pub published: Option<DateTime<Utc>>,
    /// Raw HTML description
    pub description_html: Option<String>,
}

impl FeedItem {
    /// Key used by the sent ledger
    ///
    /// The explicit identifier wins when it is non-blank, otherwise the link.
    /// Both are only trimmed, never otherwise normalized, so a feed that keeps
    /// its guids stable keeps its keys stable. Items with neither cannot be
    /// deduplicated and yield `None`.
    pub fn article_id(&self) -> Option<&str> {
        self.id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .or_else(|| {
                self.link
                    .as_deref()
                    .map(str::trim)
                    .filter(|link| !link.is_empty())
            })
    }
}

/// Ledger entry marking an article as delivered for one feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentArticleRecord {
    /// Article key, see [`FeedItem::article_id`]
    pub article_id: String,
    /// Feed the article was delivered for
    pub entity_id: String,
    /// Publication date reported by the feed
    pub publication_date: Option<DateTime<Utc>>,
    /// When the record was committed
    pub sent_at: DateTime<Utc>,
}

impl SentArticleRecord {
    /// Create a record stamped with the current time
    pub fn new(
        entity_id: impl Into<String>,
        article_id: impl Into<String>,
        publication_date: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            article_id: article_id.into(),
            entity_id: entity_id.into(),
            publication_date,
            sent_at: Utc::now(),
        }
    }
}

/// Pause state reported to observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedState {
    /// Monitor was paused
    Paused,
    /// Monitor was resumed
    Resumed,
}

impl std::fmt::Display for FeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedState::Paused => f.write_str("paused"),
            FeedState::Resumed => f.write_str("resumed"),
        }
    }
}

/// Snapshot of one running monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedStatus {
    pub entity_id: String,
    pub webhook_url: String,
    pub paused: bool,
}
