//! Read-only inspection of the stored snapshot, for debugging from the command line.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::path::Path;

use super::snapshot::CacheSnapshot;
use super::storage::SnapshotStore;
use super::traits::QueryKey;

/// Summary of the stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
  pub storage_key: String,
  pub queries: usize,
  /// Serialized size in bytes
  pub bytes: usize,
  pub written_at: Option<DateTime<Utc>>,
}

fn read(storage: &dyn SnapshotStore, key: &str) -> Result<Option<(String, CacheSnapshot)>> {
  let Some(raw) = storage.get_item(key)? else {
    return Ok(None);
  };
  let snapshot = CacheSnapshot::decode(&raw)
    .map_err(|e| eyre!("Stored snapshot {} is not readable: {}", key, e))?;
  Ok(Some((raw, snapshot)))
}

/// Size and age of the snapshot under `key`. An absent snapshot reports zero queries.
pub fn stats(storage: &dyn SnapshotStore, key: &str) -> Result<CacheStats> {
  let stats = match read(storage, key)? {
    Some((raw, snapshot)) => CacheStats {
      storage_key: key.to_string(),
      queries: snapshot.len(),
      bytes: raw.len(),
      written_at: snapshot.written_at(),
    },
    None => CacheStats {
      storage_key: key.to_string(),
      queries: 0,
      bytes: 0,
      written_at: None,
    },
  };
  Ok(stats)
}

/// Query keys in the snapshot under `key`.
pub fn list_keys(storage: &dyn SnapshotStore, key: &str) -> Result<Vec<QueryKey>> {
  Ok(
    read(storage, key)?
      .map(|(_, snapshot)| snapshot.query_keys().cloned().collect())
      .unwrap_or_default(),
  )
}

/// Write the snapshot under `key` to `path` as pretty-printed JSON.
///
/// Returns the number of queries exported.
pub fn export(storage: &dyn SnapshotStore, key: &str, path: &Path) -> Result<usize> {
  let (_, snapshot) =
    read(storage, key)?.ok_or_else(|| eyre!("No cache snapshot stored under {}", key))?;

  let pretty = serde_json::to_string_pretty(&snapshot)
    .map_err(|e| eyre!("Failed to serialize snapshot: {}", e))?;
  std::fs::write(path, pretty)
    .map_err(|e| eyre!("Failed to write {}: {}", path.display(), e))?;

  Ok(snapshot.len())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::layer::{CacheSettings, QueryCache};
  use crate::cache::storage::MemoryStorage;
  use serde_json::json;
  use std::sync::Arc;

  fn seeded() -> Arc<MemoryStorage> {
    let storage = Arc::new(MemoryStorage::new());
    let cache = QueryCache::new(storage.clone(), CacheSettings::default());
    cache.set(&QueryKey::new(["home"]), json!({"hero": "Studio"}), false);
    cache.set(&QueryKey::new(["connect"]), json!({"email": "hi@studio"}), false);
    storage
  }

  #[test]
  fn test_stats_counts_queries_and_bytes() {
    let storage = seeded();
    let stats = stats(storage.as_ref(), "cache-v1").unwrap();

    assert_eq!(stats.queries, 2);
    assert_eq!(
      stats.bytes,
      storage.get_item("cache-v1").unwrap().unwrap().len()
    );
    assert!(stats.written_at.is_some());
  }

  #[test]
  fn test_stats_for_missing_snapshot() {
    let storage = MemoryStorage::new();
    let stats = stats(&storage, "cache-v1").unwrap();
    assert_eq!(stats.queries, 0);
    assert_eq!(stats.bytes, 0);
  }

  #[test]
  fn test_list_keys() {
    let storage = seeded();
    let keys = list_keys(storage.as_ref(), "cache-v1").unwrap();
    assert_eq!(
      keys,
      vec![QueryKey::new(["connect"]), QueryKey::new(["home"])]
    );
  }

  #[test]
  fn test_export_writes_pretty_json() {
    let storage = seeded();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snapshot.json");

    let exported = export(storage.as_ref(), "cache-v1", &path).unwrap();
    assert_eq!(exported, 2);

    let written = std::fs::read_to_string(&path).unwrap();
    assert!(written.contains('\n'));
    let snapshot = CacheSnapshot::decode(&written).unwrap();
    assert_eq!(snapshot.len(), 2);
  }

  #[test]
  fn test_export_without_snapshot_fails() {
    let storage = MemoryStorage::new();
    let dir = tempfile::tempdir().unwrap();
    assert!(export(&storage, "cache-v1", &dir.path().join("x.json")).is_err());
  }
}
