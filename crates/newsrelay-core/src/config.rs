//! Configuration types for the relay
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Placeholder substituted with the entity id in [`SourceConfig::feed_url_template`]
pub const ENTITY_ID_PLACEHOLDER: &str = "{entity_id}";

/// Main relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Feed worker polling and backoff
    #[serde(default)]
    pub poll: PollConfig,

    /// Webhook delivery retry policy
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Monitor registry settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Feed source settings
    #[serde(default)]
    pub source: SourceConfig,
}

impl RelayConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.poll.validate()?;
        self.delivery.validate()?;
        self.registry.validate()?;
        self.source.validate()?;
        Ok(())
    }
}

/// Feed worker polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Fixed sleep after a successful poll (in seconds)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// First backoff delay after a failed fetch (in seconds)
    #[serde(default = "default_initial_retry_delay_secs")]
    pub initial_retry_delay_secs: u64,

    /// Cap for the doubling backoff delay (in seconds)
    #[serde(default = "default_max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,
}

impl PollConfig {
    /// Validate the polling configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.poll_interval_secs == 0 {
            return Err(crate::Error::config("Poll interval must be > 0"));
        }
        if self.initial_retry_delay_secs == 0 {
            return Err(crate::Error::config("Initial retry delay must be > 0"));
        }
        if self.initial_retry_delay_secs > self.max_retry_delay_secs {
            return Err(crate::Error::config(format!(
                "Initial retry delay ({}s) exceeds max retry delay ({}s)",
                self.initial_retry_delay_secs, self.max_retry_delay_secs
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn initial_retry_delay(&self) -> Duration {
        Duration::from_secs(self.initial_retry_delay_secs)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_secs(self.max_retry_delay_secs)
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            initial_retry_delay_secs: default_initial_retry_delay_secs(),
            max_retry_delay_secs: default_max_retry_delay_secs(),
        }
    }
}

/// Webhook delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Attempts allowed for non-rate-limit HTTP failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after a failed (non-429) attempt (in seconds)
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Wait used when a 429 response carries no usable Retry-After (in seconds)
    #[serde(default = "default_rate_limit_secs")]
    pub default_rate_limit_secs: u64,

    /// Rate-limit waits allowed per item
    ///
    /// Kept apart from `max_attempts`: 429s never consume attempts, but a
    /// destination that rate-limits forever must not pin a worker forever.
    #[serde(default = "default_max_rate_limit_waits")]
    pub max_rate_limit_waits: u32,

    /// Longest single rate-limit wait honored (in seconds)
    ///
    /// Larger Retry-After values are clamped to this.
    #[serde(default = "default_max_rate_limit_wait_secs")]
    pub max_rate_limit_wait_secs: u64,

    /// Maximum length of the embed description, in characters
    #[serde(default = "default_max_description_chars")]
    pub max_description_chars: usize,
}

impl DeliveryConfig {
    /// Validate the delivery configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_attempts == 0 {
            return Err(crate::Error::config("Delivery attempts must be > 0"));
        }
        if self.max_description_chars == 0 {
            return Err(crate::Error::config("Description limit must be > 0"));
        }
        if self.max_rate_limit_wait_secs == 0 {
            return Err(crate::Error::config("Rate limit wait ceiling must be > 0"));
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn default_rate_limit_wait(&self) -> Duration {
        Duration::from_secs(self.default_rate_limit_secs)
    }

    /// Wait for one 429, clamped to the configured ceiling
    pub fn rate_limit_wait(&self, retry_after: Option<Duration>) -> Duration {
        retry_after
            .unwrap_or_else(|| self.default_rate_limit_wait())
            .min(Duration::from_secs(self.max_rate_limit_wait_secs))
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            default_rate_limit_secs: default_rate_limit_secs(),
            max_rate_limit_waits: default_max_rate_limit_waits(),
            max_rate_limit_wait_secs: default_max_rate_limit_wait_secs(),
            max_description_chars: default_max_description_chars(),
        }
    }
}

/// Monitor registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// How long `stop_feed` waits for a worker to exit (in seconds)
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    /// Capacity of the monitoring event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl RegistryConfig {
    /// Validate the registry configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stop_timeout_secs: default_stop_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// Feed source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Per-entity feed URL; `{entity_id}` is replaced with the entity id
    #[serde(default = "default_feed_url_template")]
    pub feed_url_template: String,

    /// HTTP timeout for one feed fetch (in seconds)
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// User agent sent with feed requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl SourceConfig {
    /// Validate the source configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !self.feed_url_template.contains(ENTITY_ID_PLACEHOLDER) {
            return Err(crate::Error::config(format!(
                "Feed URL template must contain {}",
                ENTITY_ID_PLACEHOLDER
            )));
        }
        if !self.feed_url_template.starts_with("https://")
            && !self.feed_url_template.starts_with("http://")
        {
            return Err(crate::Error::config(
                "Feed URL template must use HTTP or HTTPS",
            ));
        }
        if self.http_timeout_secs == 0 {
            return Err(crate::Error::config("HTTP timeout must be > 0"));
        }
        Ok(())
    }

    /// Build the feed URL for one entity
    pub fn feed_url(&self, entity_id: &str) -> String {
        self.feed_url_template
            .replace(ENTITY_ID_PLACEHOLDER, entity_id)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            feed_url_template: default_feed_url_template(),
            http_timeout_secs: default_http_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_initial_retry_delay_secs() -> u64 {
    60
}

fn default_max_retry_delay_secs() -> u64 {
    3600
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_rate_limit_secs() -> u64 {
    5
}

fn default_max_rate_limit_waits() -> u32 {
    10
}

fn default_max_rate_limit_wait_secs() -> u64 {
    600
}

fn default_max_description_chars() -> usize {
    2000
}

fn default_stop_timeout_secs() -> u64 {
    60
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_feed_url_template() -> String {
    "https://store.steampowered.com/feeds/news/app/{entity_id}/".to_string()
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("newsrelay/", env!("CARGO_PKG_VERSION")).to_string()
}
