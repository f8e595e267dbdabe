//! Durable key/value storage for cache snapshots and its SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Trait for snapshot storage backends.
///
/// This is a flat string-to-string store: the cache owns the naming scheme
/// and the document format, the backend only keeps bytes.
pub trait SnapshotStore: Send + Sync {
  /// Read the value stored under `key`.
  fn get_item(&self, key: &str) -> Result<Option<String>>;

  /// Store `value` under `key`, replacing any previous value.
  fn set_item(&self, key: &str, value: &str) -> Result<()>;

  /// Delete `key`. Deleting a missing key is not an error.
  fn remove_item(&self, key: &str) -> Result<()>;

  /// List every stored key.
  fn keys(&self) -> Result<Vec<String>>;
}

/// Storage implementation that doesn't keep anything.
/// Used when durable storage is unavailable - all operations are no-ops.
pub struct NoopStorage;

impl SnapshotStore for NoopStorage {
  fn get_item(&self, _key: &str) -> Result<Option<String>> {
    Ok(None) // Always miss
  }

  fn set_item(&self, _key: &str, _value: &str) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove_item(&self, _key: &str) -> Result<()> {
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    Ok(Vec::new())
  }
}

/// In-process storage, lost when the process exits.
#[derive(Default)]
pub struct MemoryStorage {
  items: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl SnapshotStore for MemoryStorage {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    let items = self
      .items
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(items.get(key).cloned())
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    let mut items = self
      .items
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    items.insert(key.to_string(), value.to_string());
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    let mut items = self
      .items
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    items.remove(key);
    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let items = self
      .items
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(items.keys().cloned().collect())
  }
}

/// SQLite-based snapshot storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the storage at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open (or create) the storage at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create storage directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open storage at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway in-memory database.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory storage: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("storage.db"))
  }

  /// Run database migrations for the storage table.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STORAGE_SCHEMA)
      .map_err(|e| eyre!("Failed to run storage migrations: {}", e))?;

    Ok(())
  }
}

/// Directory holding the storage database and log files.
pub fn data_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("folio"))
}

/// Schema for the storage table.
const STORAGE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SnapshotStore for SqliteStorage {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key, e))
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO kv_store (key, value, updated_at)
         VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write {}: {}", key, e))?;

    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM kv_store WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to delete {}: {}", key, e))?;

    Ok(())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT key FROM kv_store ORDER BY key")
      .map_err(|e| eyre!("Failed to prepare key listing: {}", e))?;

    let keys = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn exercise(store: &dyn SnapshotStore) {
    assert_eq!(store.get_item("cache-v1").unwrap(), None);

    store.set_item("cache-v1", "{}").unwrap();
    store.set_item("cache-v2", "[]").unwrap();
    assert_eq!(store.get_item("cache-v1").unwrap().as_deref(), Some("{}"));

    store.set_item("cache-v1", "{\"a\":1}").unwrap();
    assert_eq!(
      store.get_item("cache-v1").unwrap().as_deref(),
      Some("{\"a\":1}")
    );
    assert_eq!(store.keys().unwrap(), vec!["cache-v1", "cache-v2"]);

    store.remove_item("cache-v1").unwrap();
    store.remove_item("cache-v1").unwrap();
    assert_eq!(store.get_item("cache-v1").unwrap(), None);
    assert_eq!(store.keys().unwrap(), vec!["cache-v2"]);
  }

  #[test]
  fn test_memory_storage() {
    exercise(&MemoryStorage::new());
  }

  #[test]
  fn test_sqlite_storage_in_memory() {
    exercise(&SqliteStorage::open_in_memory().unwrap());
  }

  #[test]
  fn test_sqlite_storage_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("storage.db");

    {
      let store = SqliteStorage::open_at(&path).unwrap();
      store.set_item("cache-v1", "persisted").unwrap();
    }

    let store = SqliteStorage::open_at(&path).unwrap();
    assert_eq!(
      store.get_item("cache-v1").unwrap().as_deref(),
      Some("persisted")
    );
  }

  #[test]
  fn test_noop_storage_discards() {
    let store = NoopStorage;
    store.set_item("cache-v1", "{}").unwrap();
    assert_eq!(store.get_item("cache-v1").unwrap(), None);
    assert!(store.keys().unwrap().is_empty());
  }
}
