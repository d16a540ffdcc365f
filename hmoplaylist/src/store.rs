//! Key-value store holding the playlist document.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension, params};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open store {0}: {1}")]
    Open(String, String),

    #[error("Store read failed for key {0}: {1}")]
    Read(String, String),

    #[error("Store write failed for key {0}: {1}")]
    Write(String, String),

    #[error("Invalid playlist document: {0}")]
    Document(String),
}

/// Minimal string store. `set` replaces the whole value atomically.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// SQLite backed store (one `kv` table).
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let display = db_path.display().to_string();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Open(display.clone(), e.to_string()))?;
        }

        let conn =
            Connection::open(db_path).map_err(|e| StoreError::Open(display.clone(), e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )
        .map_err(|e| StoreError::Open(display, e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.conn()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
            .map_err(|e| StoreError::Read(key.to_string(), e.to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
                params![key, value, now],
            )
            .map_err(|e| StoreError::Write(key.to_string(), e.to_string()))?;
        Ok(())
    }
}

/// In-memory store. Clones share their content.
#[derive(Clone, Default)]
pub struct MemoryStore {
    values: Arc<Mutex<HashMap<String, String>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following read and write fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Read(key.to_string(), "store unavailable".into()));
        }
        Ok(self.values().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Write(key.to_string(), "store unavailable".into()));
        }
        self.values().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_replaces_whole_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("nested/playlists.db")).unwrap();

        assert_eq!(store.get("playlists").unwrap(), None);
        store.set("playlists", "{\"a\":1}").unwrap();
        store.set("playlists", "{}").unwrap();
        assert_eq!(store.get("playlists").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn sqlite_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playlists.db");
        SqliteStore::open(&path).unwrap().set("k", "v").unwrap();
        assert_eq!(SqliteStore::open(&path).unwrap().get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn memory_store_can_be_made_unavailable() {
        let store = MemoryStore::new();
        let view = store.clone();
        store.set("k", "v").unwrap();
        assert_eq!(view.get("k").unwrap().as_deref(), Some("v"));

        view.set_unavailable(true);
        assert!(store.set("k", "w").is_err());
        assert!(store.get("k").is_err());
        view.set_unavailable(false);
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));
    }
}
