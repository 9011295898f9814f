//! Webhook message body built from a feed item.
//!
//! Shape (Discord embed format):
//!
//! ```json
//! { "embeds": [ { "title": "...", "url": "...", "description": "...",
//!   "footer": { "text": "Published: ..." }, "image": { "url": "..." } } ] }
//! ```
//!
//! `image` is omitted when the item's HTML has no `<img>`.

use serde::{Deserialize, Serialize};

use super::html;
use crate::model::FeedItem;

/// Title used when an entry has none
const UNTITLED: &str = "Untitled";

/// Footer date used when an entry has no publication date
const UNKNOWN_DATE: &str = "Unknown date";

/// JSON body posted to a webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    pub url: String,
    pub description: String,
    pub footer: EmbedFooter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedImage {
    pub url: String,
}

impl WebhookPayload {
    /// Build the single-embed payload for one feed item
    ///
    /// The description is the item's HTML reduced to text and cut to
    /// `max_description_chars` characters.
    pub fn from_item(item: &FeedItem, max_description_chars: usize) -> Self {
        let extracted = html::extract(item.description_html.as_deref().unwrap_or_default());

        let title = item
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(UNTITLED)
            .to_string();

        let url = item
            .link
            .as_deref()
            .map(str::trim)
            .filter(|link| !link.is_empty())
            .or_else(|| item.article_id())
            .unwrap_or_default()
            .to_string();

        let published = item
            .published
            .map(|date| date.to_rfc2822())
            .unwrap_or_else(|| UNKNOWN_DATE.to_string());

        Self {
            embeds: vec![Embed {
                title,
                url,
                description: html::truncate_chars(&extracted.text, max_description_chars),
                footer: EmbedFooter {
                    text: format!("Published: {}", published),
                },
                image: extracted.image_url.map(|url| EmbedImage { url }),
            }],
        }
    }

    /// Title of the first embed, for log messages
    pub fn title(&self) -> &str {
        self.embeds
            .first()
            .map(|embed| embed.title.as_str())
            .unwrap_or(UNTITLED)
    }
}
