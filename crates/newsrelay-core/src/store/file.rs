// # File Stores
//
// File-based implementations of SentStore and DefinitionStore with crash
// recovery (see `json_file`).
//
// ## File Formats
//
// Sent ledger:
//
// ```json
// {
//   "version": "1.0",
//   "feeds": {
//     "440": {
//       "https://store.steampowered.com/news/app/440/view/123": {
//         "publication_date": "2025-01-09T12:00:00Z",
//         "sent_at": "2025-01-09T12:01:00Z"
//       }
//     }
//   }
// }
// ```
//
// Definitions:
//
// ```json
// {
//   "version": "1.0",
//   "feeds": {
//     "440": { "webhook_url": "https://discord.com/api/webhooks/..." }
//   }
// }
// ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::json_file::{FILE_FORMAT_VERSION, JsonFile, Unrecoverable, check_version, encode};
use crate::Error;
use crate::model::{FeedDefinition, SentArticleRecord};
use crate::traits::{DefinitionStore, SentStore};

/// File-based sent ledger
///
/// Every inserted batch is written to disk before `record_batch` returns, so
/// an article is never handed to the delivery client without a durable
/// record. A failed write rolls the whole batch back.
///
/// The ledger is snapshotted under the map lock and written outside it, so
/// readers are not blocked by disk I/O. Writes are serialized by a separate
/// mutex and reach the disk in snapshot order.
///
/// A ledger that is corrupt and has no usable backup fails to load rather
/// than starting empty, since an empty ledger would redeliver every article.
///
/// # Example
///
/// ```rust,no_run
/// use newsrelay_core::store::FileSentStore;
/// use newsrelay_core::traits::SentStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileSentStore::new("/var/lib/newsrelay/sent.json").await?;
///     let sent = store.is_sent("440", "article-1").await?;
///     println!("already sent: {}", sent);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileSentStore {
    file: JsonFile,
    feeds: Arc<RwLock<LedgerFeeds>>,
    write_lock: Mutex<()>,
}

type LedgerFeeds = HashMap<String, HashMap<String, LedgerEntry>>;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct LedgerEntry {
    publication_date: Option<DateTime<Utc>>,
    sent_at: DateTime<Utc>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct LedgerFile {
    version: String,
    #[serde(default)]
    feeds: LedgerFeeds,
}

impl Default for LedgerFile {
    fn default() -> Self {
        Self {
            version: FILE_FORMAT_VERSION.to_string(),
            feeds: HashMap::new(),
        }
    }
}

impl FileSentStore {
    /// Create or load a file sent store
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = JsonFile::open(path).await?;
        let doc: LedgerFile = file.load_with_recovery(Unrecoverable::Fail).await?;
        check_version(file.path(), &doc.version);

        tracing::debug!(
            "Loaded sent ledger {}: {} feed(s)",
            file.path().display(),
            doc.feeds.len()
        );

        Ok(Self {
            file,
            feeds: Arc::new(RwLock::new(doc.feeds)),
            write_lock: Mutex::new(()),
        })
    }

    fn snapshot(feeds: &LedgerFeeds) -> Result<String, Error> {
        #[derive(serde::Serialize)]
        struct LedgerFileRef<'a> {
            version: &'a str,
            feeds: &'a LedgerFeeds,
        }

        encode(&LedgerFileRef {
            version: FILE_FORMAT_VERSION,
            feeds,
        })
    }
}

#[async_trait]
impl SentStore for FileSentStore {
    async fn is_sent(&self, entity_id: &str, article_id: &str) -> Result<bool, Error> {
        let guard = self.feeds.read().await;
        Ok(guard
            .get(entity_id)
            .is_some_and(|feed| feed.contains_key(article_id)))
    }

    async fn record_batch(&self, records: Vec<SentArticleRecord>) -> Result<Vec<bool>, Error> {
        let _writing = self.write_lock.lock().await;

        let (inserted, snapshot) = {
            let mut guard = self.feeds.write().await;

            let inserted: Vec<bool> = records
                .iter()
                .map(|record| {
                    let feed = guard.entry(record.entity_id.clone()).or_default();
                    if feed.contains_key(&record.article_id) {
                        return false;
                    }
                    feed.insert(
                        record.article_id.clone(),
                        LedgerEntry {
                            publication_date: record.publication_date,
                            sent_at: record.sent_at,
                        },
                    );
                    true
                })
                .collect();

            if !inserted.contains(&true) {
                return Ok(inserted);
            }
            (inserted, Self::snapshot(&guard))
        };

        let written = match snapshot {
            Ok(json) => self.file.write_encoded(&json).await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            let mut guard = self.feeds.write().await;
            for (record, _) in records.iter().zip(&inserted).filter(|(_, inserted)| **inserted) {
                if let Some(feed) = guard.get_mut(&record.entity_id) {
                    feed.remove(&record.article_id);
                }
            }
            return Err(e);
        }

        tracing::trace!(
            "Recorded {} article(s) in {}",
            inserted.iter().filter(|inserted| **inserted).count(),
            self.file.path().display()
        );
        Ok(inserted)
    }

    async fn sent_for(&self, entity_id: &str) -> Result<Vec<SentArticleRecord>, Error> {
        let guard = self.feeds.read().await;
        let Some(feed) = guard.get(entity_id) else {
            return Ok(Vec::new());
        };

        Ok(feed
            .iter()
            .map(|(article_id, entry)| SentArticleRecord {
                article_id: article_id.clone(),
                entity_id: entity_id.to_string(),
                publication_date: entry.publication_date,
                sent_at: entry.sent_at,
            })
            .collect())
    }

    async fn flush(&self) -> Result<(), Error> {
        // Writes are immediate
        Ok(())
    }
}

/// File-based feed definitions
///
/// Rows are kept as raw JSON so a row this build cannot decode survives
/// rewrites untouched; [`DefinitionStore::list_definitions`] skips it with a
/// warning instead of failing the whole listing.
#[derive(Debug)]
pub struct FileDefinitionStore {
    file: JsonFile,
    rows: Arc<RwLock<BTreeMap<String, serde_json::Value>>>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct DefinitionsFile {
    version: String,
    #[serde(default)]
    feeds: BTreeMap<String, serde_json::Value>,
}

impl Default for DefinitionsFile {
    fn default() -> Self {
        Self {
            version: FILE_FORMAT_VERSION.to_string(),
            feeds: BTreeMap::new(),
        }
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct DefinitionRow {
    webhook_url: String,
}

impl FileDefinitionStore {
    /// Create or load a file definition store
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = JsonFile::open(path).await?;
        let doc: DefinitionsFile = file.load_with_recovery(Unrecoverable::Reset).await?;
        check_version(file.path(), &doc.version);

        Ok(Self {
            file,
            rows: Arc::new(RwLock::new(doc.feeds)),
        })
    }

    async fn write(&self, rows: &BTreeMap<String, serde_json::Value>) -> Result<(), Error> {
        #[derive(serde::Serialize)]
        struct DefinitionsFileRef<'a> {
            version: &'a str,
            feeds: &'a BTreeMap<String, serde_json::Value>,
        }

        self.file
            .write(&DefinitionsFileRef {
                version: FILE_FORMAT_VERSION,
                feeds: rows,
            })
            .await
    }
}

#[async_trait]
impl DefinitionStore for FileDefinitionStore {
    async fn list_definitions(&self) -> Result<Vec<FeedDefinition>, Error> {
        let guard = self.rows.read().await;
        let mut definitions = Vec::with_capacity(guard.len());

        for (entity_id, raw) in guard.iter() {
            match serde_json::from_value::<DefinitionRow>(raw.clone()) {
                Ok(row) => definitions.push(FeedDefinition::new(entity_id, row.webhook_url)),
                Err(e) => {
                    tracing::warn!(
                        "Skipping malformed feed definition for {} in {}: {}",
                        entity_id,
                        self.file.path().display(),
                        e
                    );
                }
            }
        }

        Ok(definitions)
    }

    async fn upsert(&self, definition: &FeedDefinition) -> Result<(), Error> {
        let row = serde_json::to_value(DefinitionRow {
            webhook_url: definition.webhook_url.clone(),
        })?;

        let mut guard = self.rows.write().await;
        let previous = guard.insert(definition.entity_id.clone(), row);

        if let Err(e) = self.write(&guard).await {
            match previous {
                Some(previous) => guard.insert(definition.entity_id.clone(), previous),
                None => guard.remove(&definition.entity_id),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn delete(&self, entity_id: &str) -> Result<(), Error> {
        let mut guard = self.rows.write().await;
        let Some(previous) = guard.remove(entity_id) else {
            return Ok(());
        };

        if let Err(e) = self.write(&guard).await {
            guard.insert(entity_id.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FeedItem;
    use tempfile::tempdir;

    fn item(id: &str) -> FeedItem {
        FeedItem {
            id: Some(id.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_sent_ledger_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sent.json");

        let store = FileSentStore::new(&path).await.unwrap();
        let fresh = store
            .filter_new("440", vec![item("a"), item("b")])
            .await
            .unwrap();
        assert_eq!(fresh.len(), 2);
        assert!(path.exists());

        // Load new instance and verify persistence
        let reopened = FileSentStore::new(&path).await.unwrap();
        let fresh = reopened
            .filter_new("440", vec![item("a"), item("b"), item("c")])
            .await
            .unwrap();
        let ids: Vec<_> = fresh.iter().filter_map(FeedItem::article_id).collect();
        assert_eq!(ids, vec!["c"]);
        assert_eq!(reopened.sent_for("440").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_sent_ledger_corruption_recovery() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sent.json");

        let store = FileSentStore::new(&path).await.unwrap();
        store.filter_new("440", vec![item("a")]).await.unwrap();
        // Second write creates the backup holding "a" only
        store.filter_new("440", vec![item("b")]).await.unwrap();

        tokio::fs::write(&path, b"corrupted json data").await.unwrap();

        let recovered = FileSentStore::new(&path).await.unwrap();
        assert!(recovered.is_sent("440", "a").await.unwrap());
        assert!(!recovered.is_sent("440", "b").await.unwrap());
    }

    #[tokio::test]
    async fn test_sent_ledger_without_usable_backup_fails_to_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sent.json");

        // One write leaves no backup behind
        let store = FileSentStore::new(&path).await.unwrap();
        store.filter_new("440", vec![item("a")]).await.unwrap();
        tokio::fs::write(&path, b"corrupted json data").await.unwrap();

        let err = FileSentStore::new(&path).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        let backup = path.with_extension("backup");
        tokio::fs::write(&backup, b"{ also corrupted").await.unwrap();
        let err = FileSentStore::new(&path).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[tokio::test]
    async fn test_failed_write_records_nothing_from_the_batch() {
        let dir = tempdir().unwrap();
        let state = dir.path().join("state");
        let path = state.join("sent.json");

        let store = FileSentStore::new(&path).await.unwrap();
        store.filter_new("440", vec![item("old")]).await.unwrap();

        tokio::fs::remove_dir_all(&state).await.unwrap();

        let err = store
            .filter_new("440", vec![item("a"), item("b")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(!store.is_sent("440", "a").await.unwrap());
        assert!(!store.is_sent("440", "b").await.unwrap());
        assert!(store.is_sent("440", "old").await.unwrap());

        tokio::fs::create_dir_all(&state).await.unwrap();

        let fresh = store
            .filter_new("440", vec![item("old"), item("a"), item("b")])
            .await
            .unwrap();
        let ids: Vec<_> = fresh.iter().filter_map(FeedItem::article_id).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let reopened = FileSentStore::new(&path).await.unwrap();
        assert_eq!(reopened.sent_for("440").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_batches_all_reach_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sent.json");
        let store = Arc::new(FileSentStore::new(&path).await.unwrap());

        let handles: Vec<_> = ["440", "570", "730", "620"]
            .into_iter()
            .map(|entity_id| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .filter_new(entity_id, vec![item("a"), item("b")])
                        .await
                        .unwrap()
                        .len()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 2);
        }

        let reopened = FileSentStore::new(&path).await.unwrap();
        for entity_id in ["440", "570", "730", "620"] {
            assert_eq!(reopened.sent_for(entity_id).await.unwrap().len(), 2);
        }
    }

    #[tokio::test]
    async fn test_definitions_persist_and_delete() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("feeds.json");

        let store = FileDefinitionStore::new(&path).await.unwrap();
        store
            .upsert(&FeedDefinition::new("440", "https://hooks.example/a"))
            .await
            .unwrap();
        store
            .upsert(&FeedDefinition::new("570", "https://hooks.example/b"))
            .await
            .unwrap();
        store.delete("570").await.unwrap();

        let reopened = FileDefinitionStore::new(&path).await.unwrap();
        assert_eq!(
            reopened.list_definitions().await.unwrap(),
            vec![FeedDefinition::new("440", "https://hooks.example/a")]
        );
    }

    #[tokio::test]
    async fn test_malformed_definition_rows_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("feeds.json");

        tokio::fs::write(
            &path,
            br#"{
                "version": "1.0",
                "feeds": {
                    "440": { "webhook_url": "https://hooks.example/a" },
                    "570": { "webhook_url": 5 },
                    "730": "not an object"
                }
            }"#,
        )
        .await
        .unwrap();

        let store = FileDefinitionStore::new(&path).await.unwrap();
        let definitions = store.list_definitions().await.unwrap();
        assert_eq!(
            definitions,
            vec![FeedDefinition::new("440", "https://hooks.example/a")]
        );

        // Rewrites keep rows this build could not decode
        store
            .upsert(&FeedDefinition::new("620", "https://hooks.example/c"))
            .await
            .unwrap();
        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(raw.contains("not an object"));
    }
}
