//! Core traits for the relay
//!
//! This module defines the abstract interfaces the core depends on.
//!
//! - [`FeedSource`]: Fetch and parse one entity's feed
//! - [`WebhookTransport`]: Send one notification to a webhook
//! - [`SentStore`]: Durable ledger of delivered articles (deduplication)
//! - [`DefinitionStore`]: Durable feed definitions restored at startup
//! - [`StateObserver`]: Optional pause/resume callback for a front-end

pub mod feed_source;
pub mod webhook;
pub mod sent_store;
pub mod definition_store;
pub mod observer;

pub use feed_source::FeedSource;
pub use webhook::WebhookTransport;
pub use sent_store::SentStore;
pub use definition_store::DefinitionStore;
pub use observer::StateObserver;
