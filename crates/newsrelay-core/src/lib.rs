// # newsrelay-core
//
// Core library for the feed-to-webhook relay.
//
// ## Architecture Overview
//
// This library watches a set of per-entity syndication feeds and forwards
// every newly published entry to that feed's webhook, once:
// - **FeedSource**: Trait for fetching and parsing one entity's feed
// - **WebhookTransport**: Trait for a single webhook POST
// - **SentStore**: Trait for the durable delivery ledger (deduplication)
// - **DefinitionStore**: Trait for persisted feed definitions
// - **MonitorRegistry**: Owns one polling worker per feed and its controls
// - **DeliveryClient**: Payload building and the delivery retry policy
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Core logic is separate from HTTP and storage
// 2. **At-Most-Once**: An article is recorded as sent before it is delivered
// 3. **Failure Isolation**: No fetch or delivery error ever stops a worker
// 4. **Library-First**: The daemon is a thin shell over this crate

pub mod config;
pub mod delivery;
pub mod error;
pub mod model;
pub mod registry;
pub mod store;
pub mod traits;
pub mod worker;

// Re-export core types for convenience
pub use config::{DeliveryConfig, PollConfig, RegistryConfig, RelayConfig, SourceConfig};
pub use delivery::{DeliveryClient, DeliveryOutcome, WebhookPayload};
pub use error::{Error, Result};
pub use model::{FeedDefinition, FeedItem, FeedState, FeedStatus, SentArticleRecord};
pub use registry::{CreateOutcome, MonitorRegistry, RestoreReport};
pub use store::{FileDefinitionStore, FileSentStore, MemoryDefinitionStore, MemorySentStore};
pub use traits::{DefinitionStore, FeedSource, SentStore, StateObserver, WebhookTransport};
pub use worker::{Backoff, MonitorEvent};
