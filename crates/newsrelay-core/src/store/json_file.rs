// # JSON File Persistence
//
// Crash-safe JSON document storage shared by the file-backed stores.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good state
// - Recovery: Falls back to backup if corruption detected
// - Unrecoverable documents: reset to default or fail, per `Unrecoverable`

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::Error;

/// Document format version written by this build
pub(crate) const FILE_FORMAT_VERSION: &str = "1.0";

/// A JSON document on disk with backup-based recovery
#[derive(Debug, Clone)]
pub(crate) struct JsonFile {
    path: PathBuf,
}

/// What to do when neither the document nor its backup can be parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Unrecoverable {
    /// Log and start from the default document
    Reset,
    /// Refuse to load with a storage error
    Fail,
}

/// Why a load failed
enum LoadError {
    /// File could not be read
    Io(Error),
    /// File was read but is not a valid document
    Corrupt(Error),
}

impl JsonFile {
    /// Prepare a document path, creating parent directories if needed
    pub(crate) async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::storage(format!(
                    "Failed to create state directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        Ok(Self { path })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document with automatic recovery
    ///
    /// Recovery strategy:
    /// 1. Missing file yields the default document
    /// 2. A corrupt file is replaced by its backup when the backup parses
    /// 3. If the backup is missing or also unusable, `unrecoverable` decides
    ///    between the default document and a storage error
    ///
    /// Read failures other than corruption are returned as storage errors.
    pub(crate) async fn load_with_recovery<T>(
        &self,
        unrecoverable: Unrecoverable,
    ) -> Result<T, Error>
    where
        T: DeserializeOwned + Default,
    {
        let corruption = match Self::load(&self.path).await {
            Ok(doc) => return Ok(doc),
            Err(LoadError::Io(e)) => return Err(e),
            Err(LoadError::Corrupt(e)) => e,
        };

        tracing::warn!(
            "State file {} appears corrupted: {}. Attempting recovery from backup.",
            self.path.display(),
            corruption
        );

        let backup_path = self.backup_path();
        if !backup_path.exists() {
            return self.on_unrecoverable(unrecoverable, corruption, "no backup file found");
        }

        match Self::load(&backup_path).await {
            Ok(doc) => {
                tracing::info!("Recovered state from backup {}", backup_path.display());
                if let Err(e) = fs::copy(&backup_path, &self.path).await {
                    tracing::error!("Failed to restore state file from backup: {}", e);
                }
                Ok(doc)
            }
            Err(LoadError::Io(e)) | Err(LoadError::Corrupt(e)) => {
                self.on_unrecoverable(unrecoverable, corruption, &format!("backup unusable: {}", e))
            }
        }
    }

    fn on_unrecoverable<T: Default>(
        &self,
        unrecoverable: Unrecoverable,
        corruption: Error,
        reason: &str,
    ) -> Result<T, Error> {
        match unrecoverable {
            Unrecoverable::Reset => {
                tracing::error!(
                    "Cannot recover {} ({}). Starting with empty state.",
                    self.path.display(),
                    reason
                );
                Ok(T::default())
            }
            Unrecoverable::Fail => Err(Error::storage(format!(
                "Cannot recover {} ({}): {}",
                self.path.display(),
                reason,
                corruption
            ))),
        }
    }

    async fn load<T>(path: &Path) -> Result<T, LoadError>
    where
        T: DeserializeOwned + Default,
    {
        if !path.exists() {
            tracing::debug!("State file does not exist: {}", path.display());
            return Ok(T::default());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            LoadError::Io(Error::storage(format!(
                "Failed to read state file {}: {}",
                path.display(),
                e
            )))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            LoadError::Corrupt(Error::storage(format!(
                "Failed to parse state file {}: {}",
                path.display(),
                e
            )))
        })
    }

    /// Write the document atomically, keeping the previous one as backup
    pub(crate) async fn write<T: Serialize>(&self, doc: &T) -> Result<(), Error> {
        let json = encode(doc)?;
        self.write_encoded(&json).await
    }

    /// Write an already serialized document, see [`encode`]
    pub(crate) async fn write_encoded(&self, json: &str) -> Result<(), Error> {
        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::storage(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::storage(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::storage(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists()
            && let Err(e) = fs::copy(&self.path, self.backup_path()).await
        {
            tracing::warn!("Failed to create backup: {}", e);
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::storage(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("State written to file: {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    pub(crate) fn backup_path(&self) -> PathBuf {
        let mut backup = self.path.clone();
        backup.set_extension("backup");
        backup
    }
}

/// Serialize a document the way [`JsonFile::write`] stores it
pub(crate) fn encode<T: Serialize>(doc: &T) -> Result<String, Error> {
    serde_json::to_string_pretty(doc)
        .map_err(|e| Error::storage(format!("Failed to serialize state: {}", e)))
}

/// Warn when a document was written by a different format version
pub(crate) fn check_version(path: &Path, version: &str) {
    if version != FILE_FORMAT_VERSION {
        tracing::warn!(
            "State file {} version mismatch: expected {}, got {}. Attempting to load anyway.",
            path.display(),
            FILE_FORMAT_VERSION,
            version
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Doc {
        entries: Vec<String>,
    }

    #[tokio::test]
    async fn test_unrecoverable_document_resets_or_fails() {
        let dir = tempdir().unwrap();
        let file = JsonFile::open(dir.path().join("doc.json")).await.unwrap();

        fs::write(file.path(), b"{ not json").await.unwrap();

        let doc: Doc = file.load_with_recovery(Unrecoverable::Reset).await.unwrap();
        assert_eq!(doc, Doc::default());

        let err = file
            .load_with_recovery::<Doc>(Unrecoverable::Fail)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        // A corrupt backup is no better than none
        fs::write(file.backup_path(), b"also broken").await.unwrap();
        let err = file
            .load_with_recovery::<Doc>(Unrecoverable::Fail)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(msg) if msg.contains("backup unusable")));
    }

    #[tokio::test]
    async fn test_missing_document_is_default_even_when_strict() {
        let dir = tempdir().unwrap();
        let file = JsonFile::open(dir.path().join("state/doc.json")).await.unwrap();

        let doc: Doc = file.load_with_recovery(Unrecoverable::Fail).await.unwrap();
        assert_eq!(doc, Doc::default());
    }
}
