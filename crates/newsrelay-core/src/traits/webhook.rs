// # Webhook Transport Trait
//
// Defines the interface for a single notification POST.
//
// ## Implementations
//
// - Discord-style webhooks: `newsrelay-webhook-discord` crate

use async_trait::async_trait;

use crate::delivery::WebhookPayload;

/// Trait for webhook transport implementations
///
/// The transport is single-shot: one call, one request. Retry, rate-limit
/// waits and give-up decisions belong to [`crate::DeliveryClient`].
///
/// # Error Contract
///
/// - `Error::DeliveryRateLimited`: the destination answered 429
/// - `Error::DeliveryHttp`: any other non-2xx answer
/// - `Error::DeliveryUnexpected`: the request never produced an answer
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// Post one payload to a webhook URL
    async fn post(&self, webhook_url: &str, payload: &WebhookPayload)
    -> Result<(), crate::Error>;

    /// Transport name (for logging/debugging)
    fn transport_name(&self) -> &'static str;
}
