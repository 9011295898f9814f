// # Feed Source Trait
//
// Defines the interface for fetching one entity's syndication feed.
//
// ## Implementations
//
// - HTTP + RSS/Atom: `newsrelay-source-http` crate
// - Tests: scripted sources in `tests/common`

use async_trait::async_trait;

use crate::model::FeedItem;

/// Trait for feed source implementations
///
/// # Thread Safety
///
/// One source is shared by every feed worker, so implementations must be
/// safe to call concurrently for different entities.
///
/// # Responsibilities
///
/// A source performs exactly one fetch and one parse per call. It never
/// retries, sleeps or spawns tasks: backoff is owned by the feed worker.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the current entries for an entity
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<FeedItem>)`: Entries in the feed's natural order
    /// - `Err(Error::FetchTransport)`: Network-level failure
    /// - `Err(Error::FeedParse)`: The document was not a valid feed
    async fn fetch(&self, entity_id: &str) -> Result<Vec<FeedItem>, crate::Error>;

    /// Source name (for logging/debugging)
    fn source_name(&self) -> &'static str;
}
