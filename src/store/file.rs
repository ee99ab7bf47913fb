//! JSON file backed state store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::sync::{broadcast, Mutex};

use super::{StateStore, StoreChange, StoreError, CHANGE_CHANNEL_CAPACITY};
use crate::types::{PersistedState, STATE_KEY};

/// State store persisted as a JSON document on disk.
///
/// The document is an object keyed by store key; only [`STATE_KEY`] is used.
/// Writes go to a temp file first and are renamed into place so a reader in
/// another process never observes a half-written document.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    changes: broadcast::Sender<StoreChange>,
    /// Serializes read-old/write-new pairs within this process
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Creates a store at `path`. Nothing is touched on disk until the first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            path: path.into(),
            changes,
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the document path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn read_document(&self) -> Result<Option<BTreeMap<String, serde_json::Value>>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Read(format!("{}: {e}", self.path.display()))),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", self.path.display())))
    }

    async fn write_document(&self, document: &BTreeMap<String, serde_json::Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Write(format!("{}: {e}", parent.display())))?;
        }

        let serialized = serde_json::to_vec_pretty(document)
            .map_err(|e| StoreError::Write(e.to_string()))?;
        let temp_path = self.temp_path();

        tokio::fs::write(&temp_path, serialized)
            .await
            .map_err(|e| StoreError::Write(format!("{}: {e}", temp_path.display())))?;

        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StoreError::Write(format!("{}: {e}", self.path.display())));
        }

        Ok(())
    }
}

impl StateStore for FileStore {
    async fn load(&self) -> Result<Option<PersistedState>, StoreError> {
        let Some(mut document) = self.read_document().await? else {
            return Ok(None);
        };

        match document.remove(STATE_KEY) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StoreError::Corrupt(format!("{STATE_KEY}: {e}"))),
        }
    }

    async fn save(&self, state: &PersistedState) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        // A corrupt document is replaced; a failed read leaves the file alone
        let mut document = match self.read_document().await {
            Ok(document) => document.unwrap_or_default(),
            Err(e @ StoreError::Corrupt(_)) => {
                tracing::warn!("壊れた状態ファイルを上書きします: {}", e);
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };

        let old_value = document
            .get(STATE_KEY)
            .and_then(|value| serde_json::from_value(value.clone()).ok());

        let new_value = serde_json::to_value(state).map_err(|e| StoreError::Write(e.to_string()))?;
        document.insert(STATE_KEY.to_string(), new_value);
        self.write_document(&document).await?;

        tracing::trace!("状態を保存しました: {}", self.path.display());

        let _ = self.changes.send(StoreChange {
            old_value,
            new_value: state.clone(),
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
