// # Definition Store Trait
//
// Durable key-value storage of feed definitions, keyed by entity id.
// The registry writes through it on create/stop and reads it once at startup.

use async_trait::async_trait;

use crate::model::FeedDefinition;

/// Trait for feed definition storage
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// List every persisted definition
    ///
    /// Implementations should skip (and log) individual rows they cannot
    /// decode rather than failing the whole listing.
    async fn list_definitions(&self) -> Result<Vec<FeedDefinition>, crate::Error>;

    /// Insert or replace the definition for `definition.entity_id`
    async fn upsert(&self, definition: &FeedDefinition) -> Result<(), crate::Error>;

    /// Delete a definition
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Deleted (or didn't exist)
    /// - `Err(Error)`: Storage error
    async fn delete(&self, entity_id: &str) -> Result<(), crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}
