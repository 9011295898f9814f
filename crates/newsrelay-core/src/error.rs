//! Error types for the relay
//!
//! This module defines all error types used throughout the crate.
//!
//! Fetch-side errors (`FetchTransport`, `FeedParse`) are recovered by the feed
//! worker's backoff loop. Delivery-side errors are recovered by the delivery
//! client's retry policy. Only `Storage`, `Config` and `InvalidInput` ever
//! reach a caller of the registry.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error attached as the cause of a feed parse failure
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Core error type for the relay
#[derive(Error, Debug)]
pub enum Error {
    /// Network-level failure while fetching a feed
    #[error("Feed fetch failed: {0}")]
    FetchTransport(String),

    /// The feed document could not be parsed
    #[error("Feed parse error for {entity_id}: {source}")]
    FeedParse {
        /// Entity whose feed was malformed
        entity_id: String,
        /// Underlying parser error
        #[source]
        source: BoxError,
    },

    /// Webhook answered with a non-2xx, non-429 status
    #[error("Webhook returned HTTP {status}: {message}")]
    DeliveryHttp {
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// Webhook answered 429
    #[error("Webhook rate limited (retry after {retry_after:?})")]
    DeliveryRateLimited {
        /// Wait requested by the destination, if it said
        retry_after: Option<Duration>,
    },

    /// Anything else that went wrong while delivering
    #[error("Unexpected delivery error: {0}")]
    DeliveryUnexpected(String),

    /// Definitions store or sent ledger I/O failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input from an operator
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a feed transport error
    pub fn fetch_transport(msg: impl Into<String>) -> Self {
        Self::FetchTransport(msg.into())
    }

    /// Create a feed parse error with its cause attached
    pub fn feed_parse(entity_id: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::FeedParse {
            entity_id: entity_id.into(),
            source: source.into(),
        }
    }

    /// Create a delivery HTTP error
    pub fn delivery_http(status: u16, message: impl Into<String>) -> Self {
        Self::DeliveryHttp {
            status,
            message: message.into(),
        }
    }

    /// Create a rate limit error
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::DeliveryRateLimited { retry_after }
    }

    /// Create an unexpected delivery error
    pub fn delivery_unexpected(msg: impl Into<String>) -> Self {
        Self::DeliveryUnexpected(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether this error belongs on the worker's fetch backoff path
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, Self::FetchTransport(_) | Self::FeedParse { .. })
    }
}
