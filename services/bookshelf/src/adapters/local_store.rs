//! services/bookshelf/src/adapters/local_store.rs
//!
//! Device-local key-value storage kept as a single JSON object on disk. A missing
//! file reads as an empty store. Writes go to a sibling temp file first and are
//! renamed into place so a crash never leaves a half-written document.
//!
//! A file that cannot be parsed fails reads, but the next write moves it aside
//! to a `.corrupt` sibling and starts over from an empty store.

use async_trait::async_trait;
use bookshelf_core::ports::{KeyValueStore, PortError, PortResult};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

type Entries = BTreeMap<String, String>;

pub struct FileKeyValueStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn corrupt_path(&self) -> PathBuf {
        self.path.with_extension("corrupt")
    }

    async fn read(&self) -> PortResult<Result<Entries, serde_json::Error>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Ok(Entries::new())),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Ok(Entries::new())),
            Err(e) => Err(io_error(e)),
        }
    }

    async fn load(&self) -> PortResult<Entries> {
        self.read().await?.map_err(|e| {
            error!(path = %self.path.display(), "Local store is corrupt: {:?}", e);
            PortError::Unexpected(format!("Local store is unreadable: {}", e))
        })
    }

    /// Like `load`, but a corrupt file is moved aside and treated as empty.
    async fn load_for_write(&self) -> PortResult<Entries> {
        match self.read().await? {
            Ok(entries) => Ok(entries),
            Err(e) => {
                let aside = self.corrupt_path();
                warn!(path = %self.path.display(), aside = %aside.display(), "Local store is corrupt; starting over: {}", e);
                tokio::fs::rename(&self.path, &aside).await.map_err(io_error)?;
                Ok(Entries::new())
            }
        }
    }

    async fn save(&self, entries: &Entries) -> PortResult<()> {
        let bytes = serde_json::to_vec_pretty(entries)
            .map_err(|e| PortError::Unexpected(format!("Failed to encode local store: {}", e)))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(io_error)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_error)?;
        debug!(path = %self.path.display(), entries = entries.len(), "Local store written.");
        Ok(())
    }
}

fn io_error(e: std::io::Error) -> PortError {
    error!("Local store I/O failure: {:?}", e);
    PortError::Unexpected(format!("Local store I/O failure: {}", e))
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> PortResult<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> PortResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load_for_write().await?;
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries).await
    }

    async fn remove(&self, key: &str) -> PortResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load_for_write().await?;
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.save(&entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookshelf_core::memory::{InMemoryAuthenticator, InMemoryProfileStore};
    use bookshelf_core::SessionManager;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> FileKeyValueStore {
        FileKeyValueStore::new(dir.path().join("nested").join("session.json"))
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert_eq!(store.get("@bookshelf:session").await.unwrap(), None);
        store.remove("@bookshelf:session").await.unwrap();
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn values_survive_a_new_handle() {
        let dir = TempDir::new().unwrap();
        store_in(&dir).set("a", "{\"x\":1}").await.unwrap();
        store_in(&dir).set("b", "two").await.unwrap();

        let reopened = store_in(&dir);
        assert_eq!(reopened.get("a").await.unwrap().as_deref(), Some("{\"x\":1}"));
        assert_eq!(reopened.get("b").await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn remove_only_drops_the_given_key() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        store.remove("a").await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));
    }

    async fn corrupt(store: &FileKeyValueStore) {
        tokio::fs::create_dir_all(store.path().parent().unwrap()).await.unwrap();
        tokio::fs::write(store.path(), b"{truncated").await.unwrap();
    }

    #[tokio::test]
    async fn corrupt_file_fails_reads() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        corrupt(&store).await;

        assert!(matches!(store.get("a").await, Err(PortError::Unexpected(_))));
    }

    #[tokio::test]
    async fn writes_replace_a_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        corrupt(&store).await;

        store.set("a", "1").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(tokio::fs::read(store.corrupt_path()).await.unwrap(), b"{truncated");

        corrupt(&store).await;
        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sessions_recover_from_a_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        let store = FileKeyValueStore::new(path.clone());
        corrupt(&store).await;

        let auth = InMemoryAuthenticator::new().with_account("ana@example.com", "segredo1", None);
        let manager = |path: PathBuf| {
            SessionManager::new(
                Arc::new(auth.clone()),
                Arc::new(InMemoryProfileStore::new()),
                Arc::new(FileKeyValueStore::new(path)),
            )
        };

        let first = manager(path.clone());
        assert_eq!(first.restore_session().await, None);
        let session = first.login("ana@example.com", "segredo1").await.unwrap();

        assert_eq!(manager(path.clone()).restore_session().await, Some(session));

        corrupt(&store).await;
        first.logout().await;
        assert_eq!(manager(path).restore_session().await, None);
    }
}
