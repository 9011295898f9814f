// # Memory Stores
//
// In-memory implementations of SentStore and DefinitionStore.
//
// ## Crash Behavior
//
// - All state is lost on restart/crash
// - After a restart every article still listed in a feed is treated as new
//   and delivered again
//
// ## When to Use
//
// - Testing environments
// - Dry runs against a throwaway webhook

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::model::{FeedDefinition, SentArticleRecord};
use crate::traits::{DefinitionStore, SentStore};

/// In-memory sent ledger
///
/// Records are grouped per entity so lookups for one feed never scan another.
#[derive(Debug, Clone, Default)]
pub struct MemorySentStore {
    inner: Arc<RwLock<HashMap<String, HashMap<String, SentArticleRecord>>>>,
}

impl MemorySentStore {
    /// Create a new empty memory sent store
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all feeds
    pub async fn len(&self) -> usize {
        self.inner.read().await.values().map(HashMap::len).sum()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SentStore for MemorySentStore {
    async fn is_sent(&self, entity_id: &str, article_id: &str) -> Result<bool, Error> {
        let guard = self.inner.read().await;
        Ok(guard
            .get(entity_id)
            .is_some_and(|feed| feed.contains_key(article_id)))
    }

    async fn record_batch(&self, records: Vec<SentArticleRecord>) -> Result<Vec<bool>, Error> {
        let mut guard = self.inner.write().await;

        Ok(records
            .into_iter()
            .map(|record| {
                let feed = guard.entry(record.entity_id.clone()).or_default();
                if feed.contains_key(&record.article_id) {
                    return false;
                }
                feed.insert(record.article_id.clone(), record);
                true
            })
            .collect())
    }

    async fn sent_for(&self, entity_id: &str) -> Result<Vec<SentArticleRecord>, Error> {
        let guard = self.inner.read().await;
        Ok(guard
            .get(entity_id)
            .map(|feed| feed.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// In-memory feed definitions
#[derive(Debug, Clone, Default)]
pub struct MemoryDefinitionStore {
    inner: Arc<RwLock<BTreeMap<String, FeedDefinition>>>,
}

impl MemoryDefinitionStore {
    /// Create a new empty definition store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with definitions
    pub fn with_definitions(definitions: impl IntoIterator<Item = FeedDefinition>) -> Self {
        let map = definitions
            .into_iter()
            .map(|def| (def.entity_id.clone(), def))
            .collect();
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// Look up one definition
    pub async fn get(&self, entity_id: &str) -> Option<FeedDefinition> {
        self.inner.read().await.get(entity_id).cloned()
    }
}

#[async_trait]
impl DefinitionStore for MemoryDefinitionStore {
    async fn list_definitions(&self) -> Result<Vec<FeedDefinition>, Error> {
        Ok(self.inner.read().await.values().cloned().collect())
    }

    async fn upsert(&self, definition: &FeedDefinition) -> Result<(), Error> {
        self.inner
            .write()
            .await
            .insert(definition.entity_id.clone(), definition.clone());
        Ok(())
    }

    async fn delete(&self, entity_id: &str) -> Result<(), Error> {
        self.inner.write().await.remove(entity_id);
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}
