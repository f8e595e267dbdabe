//! Query cache that orchestrates staleness, persistence and network fetching.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::snapshot::CacheSnapshot;
use super::storage::SnapshotStore;
use super::traits::{CacheResult, QueryKey, QueryRecord, QueryStatus};
use super::version::{storage_key, CACHE_VERSION, DEFAULT_PREFIX};

/// Tunables for a [`QueryCache`].
#[derive(Debug, Clone)]
pub struct CacheSettings {
  /// Prefix of the snapshot storage key
  pub prefix: String,
  /// Version tag of the running build
  pub version: String,
  /// Stale time given to records that don't declare one (restored records)
  pub default_stale_time: Duration,
  /// Records older than this are dropped on access
  pub max_age: Duration,
  /// Delay between a mutation and the snapshot write it schedules
  pub persist_debounce: Duration,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      prefix: DEFAULT_PREFIX.to_string(),
      version: CACHE_VERSION.to_string(),
      default_stale_time: Duration::from_secs(5 * 60),
      max_age: Duration::from_secs(24 * 60 * 60),
      persist_debounce: Duration::from_millis(1000),
    }
  }
}

impl CacheSettings {
  pub fn storage_key(&self) -> String {
    storage_key(&self.prefix, &self.version)
  }
}

/// Persistent cache of query results keyed by [`QueryKey`].
///
/// Reads never fail: missing, expired or unreadable data is reported as
/// absent. Every mutation schedules a debounced write of the full snapshot
/// under the active version's storage key.
#[derive(Clone)]
pub struct QueryCache {
  inner: Arc<Inner>,
}

struct Inner {
  records: Mutex<HashMap<String, QueryRecord>>,
  /// Keys with a background refresh in flight
  refreshing: Mutex<HashSet<String>>,
  storage: Arc<dyn SnapshotStore>,
  settings: CacheSettings,
  storage_key: String,
  /// Bumped on every mutation; waiters subscribe instead of polling
  generation: watch::Sender<u64>,
  write_pending: AtomicBool,
}

impl QueryCache {
  /// Create an empty cache over the given storage backend.
  pub fn new(storage: Arc<dyn SnapshotStore>, settings: CacheSettings) -> Self {
    let (generation, _) = watch::channel(0);
    let storage_key = settings.storage_key();
    Self {
      inner: Arc::new(Inner {
        records: Mutex::new(HashMap::new()),
        refreshing: Mutex::new(HashSet::new()),
        storage,
        settings,
        storage_key,
        generation,
        write_pending: AtomicBool::new(false),
      }),
    }
  }

  /// Storage key of the active version's snapshot.
  pub fn storage_key(&self) -> &str {
    &self.inner.storage_key
  }

  fn records(&self) -> MutexGuard<'_, HashMap<String, QueryRecord>> {
    self
      .inner
      .records
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  fn refreshing(&self) -> MutexGuard<'_, HashSet<String>> {
    self
      .inner
      .refreshing
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  fn notify(&self) {
    self.inner.generation.send_modify(|generation| *generation += 1);
  }

  /// Look up a record. Records past the maximum age are dropped here.
  pub fn get(&self, key: &QueryKey) -> Option<QueryRecord> {
    let hash = key.query_hash();
    let now = Utc::now();

    let mut records = self.records();
    let record = records.get(&hash)?;
    if !record.is_expired_at(now, self.inner.settings.max_age) {
      return Some(record.clone());
    }

    records.remove(&hash);
    drop(records);
    debug!(key = %key, "Evicted cache record past its maximum age");
    self.notify();
    self.schedule_persist();
    None
  }

  /// Whether `key` currently has a payload.
  pub fn has_data(&self, key: &QueryKey) -> bool {
    self.get(key).is_some_and(|record| record.data.is_some())
  }

  /// Whether `key` is missing or older than its stale time.
  #[allow(dead_code)]
  pub fn is_stale(&self, key: &QueryKey) -> bool {
    self
      .get(key)
      .map(|record| record.is_stale_at(Utc::now()))
      .unwrap_or(true)
  }

  /// Whether a background refresh of `key` is in flight.
  pub fn is_refreshing(&self, key: &QueryKey) -> bool {
    self.refreshing().contains(&key.query_hash())
  }

  /// Whether `key` has data younger than `stale_time`.
  pub fn is_fresh(&self, key: &QueryKey, stale_time: Duration) -> bool {
    self
      .get(key)
      .is_some_and(|record| !record.is_stale_for(Utc::now(), stale_time))
  }

  /// Store the outcome of a fetch for `key`.
  ///
  /// On success `payload` replaces the data. On error the previous data is
  /// kept and `payload` is recorded as the error message.
  #[allow(dead_code)]
  pub fn set(&self, key: &QueryKey, payload: Value, is_error: bool) {
    if is_error {
      let message = match payload {
        Value::String(message) => message,
        other => other.to_string(),
      };
      self.store_error(key, None, message);
    } else {
      self.store_success(key, None, payload);
    }
  }

  fn store_success(&self, key: &QueryKey, stale_time: Option<Duration>, data: Value) {
    self.store_success_at(key, stale_time, data, Utc::now());
  }

  fn store_success_at(
    &self,
    key: &QueryKey,
    stale_time: Option<Duration>,
    data: Value,
    updated_at: DateTime<Utc>,
  ) {
    let default_stale = self.inner.settings.default_stale_time;
    {
      let mut records = self.records();
      let record = records
        .entry(key.query_hash())
        .or_insert_with(|| QueryRecord::pending(key.clone(), stale_time.unwrap_or(default_stale)));
      if let Some(stale_time) = stale_time {
        record.stale_time = stale_time;
      }
      record.data = Some(data);
      record.data_updated_at = Some(updated_at);
      record.status = QueryStatus::Success;
      record.error = None;
    }
    self.notify();
    self.schedule_persist();
  }

  fn store_error(&self, key: &QueryKey, stale_time: Option<Duration>, message: String) {
    let default_stale = self.inner.settings.default_stale_time;
    {
      let mut records = self.records();
      let record = records
        .entry(key.query_hash())
        .or_insert_with(|| QueryRecord::pending(key.clone(), stale_time.unwrap_or(default_stale)));
      if let Some(stale_time) = stale_time {
        record.stale_time = stale_time;
      }
      record.status = QueryStatus::Error;
      record.error = Some(message);
    }
    self.notify();
    self.schedule_persist();
  }

  fn mark_pending(&self, key: &QueryKey, stale_time: Duration) {
    self
      .records()
      .entry(key.query_hash())
      .or_insert_with(|| QueryRecord::pending(key.clone(), stale_time));
  }

  /// Read `key` with stale-while-revalidate semantics.
  ///
  /// 1. Fresh data is returned without touching the network
  /// 2. Stale data is returned immediately and refreshed in the background
  /// 3. Missing data is fetched; failures are recorded and returned
  pub async fn fetch<F, Fut, E>(
    &self,
    key: &QueryKey,
    stale_time: Duration,
    fetcher: F,
  ) -> Result<CacheResult<Value>, E>
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Value, E>> + Send + 'static,
    E: Display + Send + 'static,
  {
    if let Some(record) = self.get(key) {
      if let (Some(data), Some(updated_at)) = (record.data.clone(), record.data_updated_at) {
        if !record.is_stale_for(Utc::now(), stale_time) {
          return Ok(CacheResult::from_cache(data, updated_at, false));
        }

        self.spawn_refresh(key.clone(), stale_time, fetcher);
        return Ok(CacheResult::from_cache(data, updated_at, true));
      }
    }

    self.mark_pending(key, stale_time);
    match fetcher().await {
      Ok(data) => {
        self.store_success(key, Some(stale_time), data.clone());
        Ok(CacheResult::from_network(data))
      }
      Err(e) => {
        self.store_error(key, Some(stale_time), e.to_string());
        Err(e)
      }
    }
  }

  /// Warm `key` unless it already holds fresh data.
  ///
  /// Returns whether a fetch was issued.
  pub async fn prefetch<F, Fut, E>(
    &self,
    key: &QueryKey,
    stale_time: Duration,
    fetcher: F,
  ) -> Result<bool, E>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, E>>,
    E: Display,
  {
    if self.is_fresh(key, stale_time) {
      return Ok(false);
    }

    self.mark_pending(key, stale_time);
    match fetcher().await {
      Ok(data) => {
        self.store_success(key, Some(stale_time), data);
        Ok(true)
      }
      Err(e) => {
        self.store_error(key, Some(stale_time), e.to_string());
        Err(e)
      }
    }
  }

  /// Refresh `key` in the background. At most one refresh per key runs at a time.
  fn spawn_refresh<F, Fut, E>(&self, key: QueryKey, stale_time: Duration, fetcher: F)
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Value, E>> + Send + 'static,
    E: Display + Send + 'static,
  {
    let hash = key.query_hash();
    if !self.refreshing().insert(hash.clone()) {
      debug!(key = %key, "Refresh already in flight");
      return;
    }

    let Ok(handle) = Handle::try_current() else {
      self.refreshing().remove(&hash);
      return;
    };

    debug!(key = %key, "Serving stale data, refreshing in background");
    let cache = self.clone();
    handle.spawn(async move {
      let outcome = fetcher().await;
      // Cleared before the store notifies, so waiters see the refresh as done
      cache.refreshing().remove(&hash);
      match outcome {
        Ok(data) => cache.store_success(&key, Some(stale_time), data),
        Err(e) => {
          warn!(key = %key, error = %e, "Background refresh failed, keeping stale data");
          cache.store_error(&key, Some(stale_time), e.to_string());
        }
      }
    });
  }

  /// Wait until `key` has a payload. Wakes on record updates rather than polling.
  pub async fn wait_for_data(&self, key: &QueryKey) {
    let mut updates = self.inner.generation.subscribe();
    loop {
      if self.has_data(key) {
        return;
      }
      if updates.changed().await.is_err() {
        // The sender lives as long as the cache; nothing more will arrive
        std::future::pending::<()>().await;
      }
    }
  }

  /// Subscribe to the mutation counter.
  pub fn subscribe(&self) -> watch::Receiver<u64> {
    self.inner.generation.subscribe()
  }

  /// Load the active version's snapshot. Runs once at startup, before any query.
  ///
  /// Missing, corrupt or expired snapshots leave the cache empty. Returns the
  /// number of records restored.
  pub fn restore(&self) -> usize {
    let key = self.storage_key();
    let raw = match self.inner.storage.get_item(key) {
      Ok(Some(raw)) => raw,
      Ok(None) => {
        debug!(key, "No cache snapshot stored");
        return 0;
      }
      Err(e) => {
        warn!(key, error = %e, "Could not read cache snapshot, starting empty");
        return 0;
      }
    };

    let snapshot = match CacheSnapshot::decode(&raw) {
      Ok(snapshot) => snapshot,
      Err(e) => {
        warn!(key, error = %e, "Discarding unreadable cache snapshot");
        self.discard_snapshot();
        return 0;
      }
    };

    if snapshot.buster != self.inner.settings.version {
      info!(key, buster = %snapshot.buster, "Discarding cache snapshot from another build");
      self.discard_snapshot();
      return 0;
    }

    let now = Utc::now();
    let max_age = self.inner.settings.max_age;
    let expired = snapshot
      .written_at()
      .and_then(|written_at| (now - written_at).to_std().ok())
      .is_some_and(|age| age > max_age);
    if expired {
      info!(key, "Discarding expired cache snapshot");
      self.discard_snapshot();
      return 0;
    }

    let restored = snapshot.into_records(self.inner.settings.default_stale_time);
    let mut count = 0;
    {
      let mut records = self.records();
      for record in restored {
        if record.is_expired_at(now, max_age) {
          continue;
        }
        if let Entry::Vacant(slot) = records.entry(record.key.query_hash()) {
          slot.insert(record);
          count += 1;
        }
      }
    }

    info!(key, count, "Restored cache snapshot");
    self.notify();
    count
  }

  fn discard_snapshot(&self) {
    if let Err(e) = self.inner.storage.remove_item(self.storage_key()) {
      warn!(key = self.storage_key(), error = %e, "Failed to delete cache snapshot");
    }
  }

  /// Drop every record and delete the active version's snapshot. Idempotent.
  pub fn clear(&self) {
    self.records().clear();
    self.discard_snapshot();
    self.notify();
  }

  /// Current in-memory state as a snapshot.
  pub fn snapshot(&self) -> CacheSnapshot {
    let records = self.records();
    CacheSnapshot::from_records(records.values(), Utc::now(), &self.inner.settings.version)
  }

  /// Cached query keys, sorted by hash.
  #[allow(dead_code)]
  pub fn keys(&self) -> Vec<QueryKey> {
    let mut keys: Vec<QueryKey> = self
      .records()
      .values()
      .map(|record| record.key.clone())
      .collect();
    keys.sort_by_key(|key| key.query_hash());
    keys
  }

  fn schedule_persist(&self) {
    if self.inner.write_pending.swap(true, Ordering::AcqRel) {
      return;
    }

    match Handle::try_current() {
      Ok(handle) => {
        let cache = self.clone();
        let delay = self.inner.settings.persist_debounce;
        handle.spawn(async move {
          tokio::time::sleep(delay).await;
          cache.inner.write_pending.store(false, Ordering::Release);
          cache.flush();
        });
      }
      Err(_) => {
        self.inner.write_pending.store(false, Ordering::Release);
        self.flush();
      }
    }
  }

  /// Write the snapshot now. Failures are logged, never returned.
  pub fn flush(&self) {
    if let Err(e) = self.write_snapshot() {
      warn!(key = self.storage_key(), error = %e, "Failed to persist cache snapshot");
    }
  }

  fn write_snapshot(&self) -> color_eyre::Result<()> {
    let snapshot = self.snapshot();
    if snapshot.is_empty() {
      return self.inner.storage.remove_item(self.storage_key());
    }

    let raw = snapshot.encode()?;
    self.inner.storage.set_item(self.storage_key(), &raw)?;
    debug!(
      key = self.storage_key(),
      queries = snapshot.len(),
      bytes = raw.len(),
      "Persisted cache snapshot"
    );
    Ok(())
  }
}
