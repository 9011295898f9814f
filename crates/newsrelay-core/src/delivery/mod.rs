//! Webhook delivery with retry policy
//!
//! The [`DeliveryClient`] turns one [`FeedItem`] into a [`WebhookPayload`]
//! and hands it to a single-shot [`WebhookTransport`], deciding after every
//! answer whether to retry, wait or give up.
//!
//! ## Policy
//!
//! | Transport result          | Action                                        |
//! |---------------------------|-----------------------------------------------|
//! | `Ok`                      | Delivered                                     |
//! | `DeliveryRateLimited`     | Sleep Retry-After (capped), not counted       |
//! | `DeliveryHttp`            | Count attempt, sleep retry delay, retry       |
//! | anything else             | Abort this item                               |
//!
//! After `max_attempts` counted failures the item is given up. Every outcome
//! is terminal for the item: the article was recorded as sent before delivery
//! started and is never retried on a later poll.

pub mod html;
pub mod payload;

pub use payload::{Embed, EmbedFooter, EmbedImage, WebhookPayload};

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::Error;
use crate::config::DeliveryConfig;
use crate::model::FeedItem;
use crate::traits::WebhookTransport;

/// Final result of delivering one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The webhook accepted the payload
    Delivered {
        /// Counted attempts, including the successful one
        attempts: u32,
    },

    /// Retry budget exhausted
    GaveUp {
        /// Counted attempts made
        attempts: u32,
        /// Last error seen
        last_error: String,
    },

    /// A non-retryable error ended delivery early
    Aborted {
        /// The error that stopped delivery
        error: String,
    },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Delivers feed items to webhooks with bounded retries
#[derive(Clone)]
pub struct DeliveryClient {
    transport: Arc<dyn WebhookTransport>,
    config: DeliveryConfig,
}

impl DeliveryClient {
    /// Create a new delivery client
    ///
    /// # Parameters
    ///
    /// - `transport`: Single-shot webhook transport
    /// - `config`: Retry policy and payload limits
    pub fn new(transport: Arc<dyn WebhookTransport>, config: DeliveryConfig) -> Self {
        Self { transport, config }
    }

    /// Deliver one item to a webhook
    ///
    /// Never returns an error: every failure is logged and reported through
    /// the returned [`DeliveryOutcome`].
    ///
    /// # Parameters
    ///
    /// - `entity_id`: Feed the item belongs to (for logging)
    /// - `item`: The new article
    /// - `webhook_url`: Destination
    pub async fn deliver(
        &self,
        entity_id: &str,
        item: &FeedItem,
        webhook_url: &str,
    ) -> DeliveryOutcome {
        let payload = WebhookPayload::from_item(item, self.config.max_description_chars);
        let article = item.article_id().unwrap_or(payload.title()).to_string();

        let mut attempts: u32 = 0;
        let mut rate_limit_waits: u32 = 0;

        loop {
            let result = self.transport.post(webhook_url, &payload).await;

            let error = match result {
                Ok(()) => {
                    attempts += 1;
                    info!(
                        "Delivered \"{}\" for {} via {}",
                        payload.title(),
                        entity_id,
                        self.transport.transport_name()
                    );
                    return DeliveryOutcome::Delivered { attempts };
                }
                Err(e) => e,
            };

            match error {
                Error::DeliveryRateLimited { retry_after } => {
                    if rate_limit_waits >= self.config.max_rate_limit_waits {
                        error!(
                            "Giving up on {} for {}: still rate limited after {} waits",
                            article, entity_id, rate_limit_waits
                        );
                        return DeliveryOutcome::GaveUp {
                            attempts,
                            last_error: Error::DeliveryRateLimited { retry_after }.to_string(),
                        };
                    }
                    rate_limit_waits += 1;

                    let wait = self.config.rate_limit_wait(retry_after);
                    warn!(
                        "Rate limited delivering {} for {}, waiting {:?}",
                        article, entity_id, wait
                    );
                    tokio::time::sleep(wait).await;
                }
                Error::DeliveryHttp { status, message } => {
                    attempts += 1;
                    let last_error = Error::DeliveryHttp { status, message }.to_string();

                    if attempts >= self.config.max_attempts {
                        error!(
                            "Giving up on {} for {} after {} attempts: {}",
                            article, entity_id, attempts, last_error
                        );
                        return DeliveryOutcome::GaveUp {
                            attempts,
                            last_error,
                        };
                    }

                    warn!(
                        "Delivery attempt {} failed for {} ({}): {}",
                        attempts, article, entity_id, last_error
                    );
                    debug!("Retrying in {:?}", self.config.retry_delay());
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
                other => {
                    error!(
                        "Aborting delivery of {} for {}: {}",
                        article, entity_id, other
                    );
                    return DeliveryOutcome::Aborted {
                        error: other.to_string(),
                    };
                }
            }
        }
    }

    /// Retry policy in use
    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }
}

impl std::fmt::Debug for DeliveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryClient")
            .field("transport", &self.transport.transport_name())
            .field("config", &self.config)
            .finish()
    }
}
