use std::collections::HashMap;
use std::future::Future;

use tokio::sync::RwLock;

/// Error type returned by storage backends.
pub type StorageError = Box<dyn std::error::Error + Send + Sync>;

/// Durable key-value storage for session data.
///
/// [`update`](Self::update) must be all-or-nothing: a reader never observes
/// some of its writes and removals applied and others not.
///
/// # Example
///
/// ```rust,ignore
/// impl SessionStorage for Keychain {
///     async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
///         self.read_item(key).await
///     }
///
///     async fn update(&self, set: &[(&str, &str)], remove: &[&str]) -> Result<(), StorageError> {
///         let mut tx = self.begin().await?;
///         tx.write_items(set)?;
///         tx.delete_items(remove)?;
///         tx.commit().await
///     }
/// }
/// ```
pub trait SessionStorage: Send + Sync + 'static {
    /// Read a single value.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StorageError>> + Send;

    /// Write `set` and remove `remove` in one step. Missing keys are ignored.
    fn update(
        &self,
        set: &[(&str, &str)],
        remove: &[&str],
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// Write several values in one step.
    fn set_many(
        &self,
        entries: &[(&str, &str)],
    ) -> impl Future<Output = Result<(), StorageError>> + Send {
        self.update(entries, &[])
    }

    /// Remove several keys in one step.
    fn remove_many(&self, keys: &[&str]) -> impl Future<Output = Result<(), StorageError>> + Send {
        self.update(&[], keys)
    }
}

fn apply(map: &mut HashMap<String, String>, set: &[(&str, &str)], remove: &[&str]) {
    for (key, value) in set {
        map.insert((*key).to_owned(), (*value).to_owned());
    }
    for key in remove {
        map.remove(*key);
    }
}

/// Process-local storage. Sessions do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl SessionStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn update(&self, set: &[(&str, &str)], remove: &[&str]) -> Result<(), StorageError> {
        apply(&mut *self.entries.write().await, set, remove);
        Ok(())
    }
}

#[cfg(feature = "fs")]
pub use file::FileStorage;

#[cfg(feature = "fs")]
mod file {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    use tokio::sync::Mutex;

    use super::{SessionStorage, StorageError};

    /// Storage backed by a single JSON object on disk.
    ///
    /// Every mutation rewrites the file through a temporary sibling and a
    /// rename, so a crash leaves either the old or the new contents.
    #[derive(Debug)]
    pub struct FileStorage {
        path: PathBuf,
        entries: Mutex<HashMap<String, String>>,
    }

    impl FileStorage {
        /// Open (or lazily create) the store at `path`.
        ///
        /// # Errors
        ///
        /// Returns an error if the file exists but cannot be read or is not a
        /// JSON object of strings.
        pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
            let path = path.into();
            let entries = match tokio::fs::read(&path).await {
                Ok(bytes) if bytes.is_empty() => HashMap::new(),
                Ok(bytes) => serde_json::from_slice(&bytes)?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
                Err(e) => return Err(e.into()),
            };
            Ok(Self {
                path,
                entries: Mutex::new(entries),
            })
        }

        #[must_use]
        pub fn path(&self) -> &Path {
            &self.path
        }

        async fn persist(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
            let bytes = serde_json::to_vec_pretty(entries)?;
            let tmp = self.path.with_extension("tmp");
            tokio::fs::write(&tmp, bytes).await?;
            tokio::fs::rename(&tmp, &self.path).await?;
            Ok(())
        }
    }

    impl SessionStorage for FileStorage {
        async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            Ok(self.entries.lock().await.get(key).cloned())
        }

        async fn update(&self, set: &[(&str, &str)], remove: &[&str]) -> Result<(), StorageError> {
            let mut map = self.entries.lock().await;
            let mut next = map.clone();
            super::apply(&mut next, set, remove);
            self.persist(&next).await?;
            *map = next;
            Ok(())
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_set_get_remove() {
        let store = MemoryStorage::new();
        store.set_many(&[("token", "a"), ("user", "{}")]).await.unwrap();
        assert_eq!(store.get("token").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.len().await, 2);

        store.remove_many(&["token", "user", "missing"]).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn update_sets_and_removes_together() {
        let store = MemoryStorage::new();
        store.set_many(&[("token", "old"), ("refreshToken", "r")]).await.unwrap();

        store.update(&[("token", "new")], &["refreshToken"]).await.unwrap();

        assert_eq!(store.get("token").await.unwrap().as_deref(), Some("new"));
        assert!(store.get("refreshToken").await.unwrap().is_none());
        assert_eq!(store.len().await, 1);
    }
}
