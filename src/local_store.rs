use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::notify::{NotifyHub, StoreChange};

pub const AUTH_TOKEN_KEY: &str = "auth_token";
pub const USER_DATA_KEY: &str = "user_data";
pub const HISTORY_KEY: &str = "user_peminjaman";

/// String key-value store shared by every tab of one client profile.
///
/// Writes are last-write-wins and are broadcast to subscribers of the key,
/// tagged with the writing tab's origin so a tab can skip its own echoes.
/// With a backing file, every write rewrites the file via temp + rename.
pub struct LocalStore {
    entries: DashMap<String, String>,
    hub: NotifyHub,
    path: Option<PathBuf>,
    /// Serializes file rewrites.
    persist_lock: Mutex<()>,
}

impl LocalStore {
    pub fn in_memory() -> Self {
        Self {
            entries: DashMap::new(),
            hub: NotifyHub::new(),
            path: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Load the store from `path`. A missing file is an empty store;
    /// an unreadable one is logged and started empty.
    pub fn open(path: &Path) -> io::Result<Self> {
        let map: BTreeMap<String, String> = match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!(path = %path.display(), "local store unreadable, starting empty: {e}");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e),
        };
        Ok(Self {
            entries: map.into_iter().collect(),
            hub: NotifyHub::new(),
            path: Some(path.to_path_buf()),
            persist_lock: Mutex::new(()),
        })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    pub fn set(&self, origin: Ulid, key: &str, value: String) {
        self.entries.insert(key.to_string(), value.clone());
        self.changed(origin, key, Some(value));
    }

    pub fn remove(&self, origin: Ulid, key: &str) {
        if self.entries.remove(key).is_some() {
            self.changed(origin, key, None);
        }
    }

    pub fn subscribe(&self, key: &str) -> broadcast::Receiver<StoreChange> {
        self.hub.subscribe(key)
    }

    fn changed(&self, origin: Ulid, key: &str, value: Option<String>) {
        if let Err(e) = self.persist() {
            tracing::warn!(key, "local store write failed: {e}");
        }
        self.hub.send(&StoreChange {
            key: key.to_string(),
            value,
            origin,
        });
    }

    fn persist(&self) -> io::Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        let _guard = self.persist_lock.lock().unwrap_or_else(|e| e.into_inner());
        let snapshot: BTreeMap<String, String> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let tmp_path = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&serde_json::to_vec(&snapshot)?)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_are_broadcast_with_origin() {
        let store = LocalStore::in_memory();
        let mut rx = store.subscribe(AUTH_TOKEN_KEY);
        let tab = Ulid::new();

        store.set(tab, AUTH_TOKEN_KEY, "t1".into());
        let change = rx.recv().await.unwrap();
        assert_eq!(change.value.as_deref(), Some("t1"));
        assert_eq!(change.origin, tab);
        assert_eq!(store.get(AUTH_TOKEN_KEY).as_deref(), Some("t1"));

        store.remove(tab, AUTH_TOKEN_KEY);
        assert_eq!(rx.recv().await.unwrap().value, None);
        assert_eq!(store.get(AUTH_TOKEN_KEY), None);
    }

    #[test]
    fn removing_absent_key_is_silent() {
        let store = LocalStore::in_memory();
        let mut rx = store.subscribe(USER_DATA_KEY);
        store.remove(Ulid::new(), USER_DATA_KEY);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = std::env::temp_dir().join("roombook_test_local_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("store.json");
        let _ = std::fs::remove_file(&path);

        let store = LocalStore::open(&path).unwrap();
        store.set(Ulid::new(), HISTORY_KEY, "[]".into());
        store.set(Ulid::new(), AUTH_TOKEN_KEY, "t1".into());
        store.remove(Ulid::new(), AUTH_TOKEN_KEY);

        let reopened = LocalStore::open(&path).unwrap();
        assert_eq!(reopened.get(HISTORY_KEY).as_deref(), Some("[]"));
        assert_eq!(reopened.get(AUTH_TOKEN_KEY), None);
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = std::env::temp_dir().join("roombook_test_local_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("corrupt.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store = LocalStore::open(&path).unwrap();
        assert_eq!(store.get(HISTORY_KEY), None);
    }
}
