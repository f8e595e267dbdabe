//! Startup reconciliation of stored snapshots against the running build's version tag.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::storage::SnapshotStore;

/// Version tag compiled into this build. Bump it whenever cached payloads
/// stop matching what the content API returns.
pub const CACHE_VERSION: &str = "v1";

/// Default prefix for snapshot storage keys.
pub const DEFAULT_PREFIX: &str = "cache";

/// Storage key for a snapshot, `{prefix}-{version}`.
pub fn storage_key(prefix: &str, version: &str) -> String {
  format!("{}-{}", prefix, version)
}

/// Version embedded in a storage key, or `None` if the key isn't ours.
pub fn embedded_version<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
  key
    .strip_prefix(prefix)?
    .strip_prefix('-')
    .filter(|version| !version.is_empty())
}

/// Outcome of [`VersionGate::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
  /// Storage now only holds snapshots for the current version
  Reconciled { purged: Vec<String> },
  /// Storage could not be enumerated or cleaned; treat the cache as empty
  Unknown,
}

impl GateOutcome {
  /// Whether the stored snapshot for the current version can be trusted.
  pub fn can_restore(&self) -> bool {
    matches!(self, Self::Reconciled { .. })
  }
}

/// Deletes snapshots written by other builds.
pub struct VersionGate {
  storage: Arc<dyn SnapshotStore>,
  prefix: String,
}

impl VersionGate {
  pub fn new(storage: Arc<dyn SnapshotStore>, prefix: impl Into<String>) -> Self {
    Self {
      storage,
      prefix: prefix.into(),
    }
  }

  /// Delete every snapshot key whose version differs from `current`.
  ///
  /// Runs once, before the cache is restored. Other snapshots are never
  /// parsed. Storage failures are logged and reported as
  /// [`GateOutcome::Unknown`]; they never abort startup.
  pub fn reconcile(&self, current: &str) -> GateOutcome {
    let keys = match self.storage.keys() {
      Ok(keys) => keys,
      Err(e) => {
        warn!(error = %e, "Could not enumerate cache storage, starting with an empty cache");
        return GateOutcome::Unknown;
      }
    };

    let mut purged = Vec::new();
    let mut failed = false;

    for key in keys {
      let Some(version) = embedded_version(&self.prefix, &key) else {
        continue;
      };
      if version == current {
        debug!(key = %key, "Keeping cache snapshot for current version");
        continue;
      }

      match self.storage.remove_item(&key) {
        Ok(()) => {
          info!(key = %key, version, current, "Purged cache snapshot from another version");
          purged.push(key);
        }
        Err(e) => {
          warn!(key = %key, error = %e, "Failed to purge outdated cache snapshot");
          failed = true;
        }
      }
    }

    if failed {
      GateOutcome::Unknown
    } else {
      GateOutcome::Reconciled { purged }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::MemoryStorage;
  use color_eyre::eyre::eyre;

  /// Store whose enumeration or deletion can be made to fail.
  struct BrokenStorage {
    inner: MemoryStorage,
    fail_keys: bool,
    fail_remove: bool,
  }

  impl SnapshotStore for BrokenStorage {
    fn get_item(&self, key: &str) -> color_eyre::Result<Option<String>> {
      self.inner.get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> color_eyre::Result<()> {
      self.inner.set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> color_eyre::Result<()> {
      if self.fail_remove {
        return Err(eyre!("storage is read-only"));
      }
      self.inner.remove_item(key)
    }

    fn keys(&self) -> color_eyre::Result<Vec<String>> {
      if self.fail_keys {
        return Err(eyre!("storage unavailable"));
      }
      self.inner.keys()
    }
  }

  #[test]
  fn test_storage_key_format() {
    assert_eq!(storage_key("cache", "v2"), "cache-v2");
  }

  #[test]
  fn test_embedded_version() {
    assert_eq!(embedded_version("cache", "cache-v1"), Some("v1"));
    assert_eq!(embedded_version("cache", "cache-2024.10"), Some("2024.10"));
    assert_eq!(embedded_version("cache", "cache-"), None);
    assert_eq!(embedded_version("cache", "cachev1"), None);
    assert_eq!(embedded_version("cache", "theme"), None);
  }

  #[test]
  fn test_reconcile_purges_other_versions() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set_item("cache-v1", "{}").unwrap();
    storage.set_item("cache-v0", "{}").unwrap();
    storage.set_item("cache-v2", "{}").unwrap();
    storage.set_item("theme", "dark").unwrap();

    let gate = VersionGate::new(storage.clone(), "cache");
    let outcome = gate.reconcile("v2");

    assert_eq!(
      outcome,
      GateOutcome::Reconciled {
        purged: vec!["cache-v0".to_string(), "cache-v1".to_string()]
      }
    );
    assert_eq!(storage.keys().unwrap(), vec!["cache-v2", "theme"]);
  }

  #[test]
  fn test_reconcile_is_noop_when_current() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set_item("cache-v1", "{\"keep\":true}").unwrap();

    let outcome = VersionGate::new(storage.clone(), "cache").reconcile("v1");

    assert_eq!(outcome, GateOutcome::Reconciled { purged: vec![] });
    assert_eq!(
      storage.get_item("cache-v1").unwrap().as_deref(),
      Some("{\"keep\":true}")
    );
  }

  #[test]
  fn test_reconcile_never_parses_foreign_snapshots() {
    let storage = Arc::new(MemoryStorage::new());
    storage.set_item("cache-v1", "not json at all").unwrap();

    let outcome = VersionGate::new(storage.clone(), "cache").reconcile("v2");

    assert!(outcome.can_restore());
    assert!(storage.keys().unwrap().is_empty());
  }

  #[test]
  fn test_enumeration_failure_degrades_to_unknown() {
    let storage = Arc::new(BrokenStorage {
      inner: MemoryStorage::new(),
      fail_keys: true,
      fail_remove: false,
    });
    let outcome = VersionGate::new(storage, "cache").reconcile("v1");
    assert_eq!(outcome, GateOutcome::Unknown);
    assert!(!outcome.can_restore());
  }

  #[test]
  fn test_deletion_failure_degrades_to_unknown() {
    let storage = Arc::new(BrokenStorage {
      inner: MemoryStorage::new(),
      fail_keys: false,
      fail_remove: true,
    });
    storage.set_item("cache-v1", "{}").unwrap();

    let outcome = VersionGate::new(storage, "cache").reconcile("v2");
    assert_eq!(outcome, GateOutcome::Unknown);
  }

  #[test]
  fn test_version_bump_hides_previous_build_data() {
    use crate::cache::{CacheSettings, QueryCache, QueryKey};
    use serde_json::json;

    let storage = Arc::new(MemoryStorage::new());
    let home = QueryKey::new(["home"]);
    let press = QueryKey::new(["press-articles"]);

    let settings = |version: &str| CacheSettings {
      version: version.to_string(),
      ..CacheSettings::default()
    };

    let old_build = QueryCache::new(storage.clone(), settings("v1"));
    old_build.set(&home, json!({"hero": "Studio"}), false);
    old_build.set(&press, json!([{"id": 1}]), false);
    old_build.flush();
    assert!(storage.get_item("cache-v1").unwrap().is_some());

    let outcome = VersionGate::new(storage.clone(), "cache").reconcile("v2");
    assert_eq!(
      outcome,
      GateOutcome::Reconciled {
        purged: vec!["cache-v1".to_string()]
      }
    );
    assert!(storage.keys().unwrap().is_empty());

    let new_build = QueryCache::new(storage, settings("v2"));
    assert_eq!(new_build.restore(), 0);
    assert!(!new_build.has_data(&home));
    assert!(!new_build.has_data(&press));
  }
}