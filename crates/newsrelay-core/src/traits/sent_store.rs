// # Sent Store Trait
//
// Defines the durable delivery ledger used for deduplication.
//
// ## Purpose
//
// The sent store is the single authority for "new vs. already delivered".
// A record `(article_id, entity_id)` is committed before the article is handed
// to the delivery client, so a crash between the two loses at most that one
// delivery and never repeats it.
//
// ## Implementations
//
// - Memory: `MemorySentStore`
// - JSON file with crash recovery: `FileSentStore`
//
// ## Usage
//
// ```rust,ignore
// use newsrelay_core::SentStore;
//
// let fresh = store.filter_new("440", items).await?;
// for item in fresh {
//     delivery.deliver("440", &item, webhook_url).await;
// }
// ```

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::model::{FeedItem, SentArticleRecord};

/// Trait for sent ledger implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently for distinct entity ids.
/// Calls for one entity id are serialized by the worker that owns it.
///
/// # Retention
///
/// Records are never updated or pruned by the core.
#[async_trait]
pub trait SentStore: Send + Sync {
    /// Check whether an article was already recorded for an entity
    async fn is_sent(&self, entity_id: &str, article_id: &str) -> Result<bool, crate::Error>;

    /// Durably record a batch of articles, skipping those already present
    ///
    /// The batch commits as a whole: on `Err` none of its records may be
    /// stored. A key repeated within the batch is inserted once, by its
    /// first occurrence.
    ///
    /// # Returns
    ///
    /// - `Ok(Vec<bool>)`: For each record in input order, whether it was inserted
    /// - `Err(Error)`: Storage error; nothing from this batch was recorded
    async fn record_batch(
        &self,
        records: Vec<SentArticleRecord>,
    ) -> Result<Vec<bool>, crate::Error>;

    /// Durably record one article unless it is already present
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: Record inserted
    /// - `Ok(false)`: A record for the same key already existed; nothing written
    /// - `Err(Error)`: Storage error
    async fn record_sent(&self, record: SentArticleRecord) -> Result<bool, crate::Error> {
        let inserted = self.record_batch(vec![record]).await?;
        Ok(inserted.first().copied().unwrap_or(false))
    }

    /// All records for one entity, in no particular order
    async fn sent_for(&self, entity_id: &str) -> Result<Vec<SentArticleRecord>, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;

    /// Keep only the items not yet delivered for `entity_id`
    ///
    /// Every returned item has been recorded before this returns. The input
    /// order is preserved, and an article listed twice in one batch is
    /// returned once. The new items are recorded in one batch, so on `Err`
    /// none of them is recorded and the next poll sees them as new again.
    async fn filter_new(
        &self,
        entity_id: &str,
        items: Vec<FeedItem>,
    ) -> Result<Vec<FeedItem>, crate::Error> {
        let mut keyed = Vec::with_capacity(items.len());
        let mut records = Vec::with_capacity(items.len());

        for item in items {
            let Some(article_id) = item.article_id() else {
                warn!(
                    "Skipping entry without id or link for {} (title: {:?})",
                    entity_id, item.title
                );
                continue;
            };

            records.push(SentArticleRecord::new(entity_id, article_id, item.published));
            keyed.push(item);
        }

        if records.is_empty() {
            return Ok(Vec::new());
        }

        let inserted = self.record_batch(records).await?;

        Ok(keyed
            .into_iter()
            .zip(inserted)
            .filter_map(|(item, inserted)| {
                if !inserted {
                    debug!(
                        "Article {} already sent for {}",
                        item.article_id().unwrap_or_default(),
                        entity_id
                    );
                }
                inserted.then_some(item)
            })
            .collect())
    }
}
