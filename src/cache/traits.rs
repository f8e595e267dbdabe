//! Core traits and types for the query cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Logical name of a cached query, e.g. `["home"]` or `["press-articles"]`.
///
/// Keys are compared segment by segment; two keys with the same segments
/// always share one record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
  pub fn new<I, S>(segments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self(segments.into_iter().map(Into::into).collect())
  }

  /// Stable hash of the key, used as the record map key and persisted as `queryHash`.
  ///
  /// This is the compact JSON encoding of the segment array, so `["home"]`
  /// hashes to the literal string `["home"]`.
  pub fn query_hash(&self) -> String {
    serde_json::to_string(&self.0).unwrap_or_else(|_| self.0.join("/"))
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.join("/"))
  }
}

impl From<&[&str]> for QueryKey {
  fn from(segments: &[&str]) -> Self {
    Self::new(segments.iter().copied())
  }
}

/// Lifecycle status of a query record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
  /// First fetch is in flight, no data yet
  Pending,
  /// Last fetch succeeded
  Success,
  /// Last fetch failed; previous data (if any) is kept
  Error,
}

/// A single cached query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRecord {
  pub key: QueryKey,
  /// Last successfully fetched payload
  pub data: Option<Value>,
  /// When `data` was fetched
  pub data_updated_at: Option<DateTime<Utc>>,
  /// How long `data` is served without triggering a refresh
  pub stale_time: Duration,
  pub status: QueryStatus,
  /// Message of the most recent failed fetch
  pub error: Option<String>,
}

impl QueryRecord {
  pub fn pending(key: QueryKey, stale_time: Duration) -> Self {
    Self {
      key,
      data: None,
      data_updated_at: None,
      stale_time,
      status: QueryStatus::Pending,
      error: None,
    }
  }

  /// Age of the data at `now`. Timestamps in the future count as age zero.
  pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
    self
      .data_updated_at
      .map(|updated_at| (now - updated_at).to_std().unwrap_or(Duration::ZERO))
  }

  /// Stale against the record's own stale time.
  pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
    self.is_stale_for(now, self.stale_time)
  }

  /// Stale against an explicit stale time. Records without data are always stale.
  pub fn is_stale_for(&self, now: DateTime<Utc>, stale_time: Duration) -> bool {
    if self.data.is_none() {
      return true;
    }
    self.age(now).map(|age| age > stale_time).unwrap_or(true)
  }

  /// Expired records are dropped regardless of staleness.
  pub fn is_expired_at(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
    self.age(now).map(|age| age > max_age).unwrap_or(false)
  }
}

/// Result from a cache read, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was fetched (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>, is_stale: bool) -> Self {
    Self {
      data,
      source: if is_stale {
        CacheSource::CacheStale
      } else {
        CacheSource::CacheFresh
      },
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache past its stale time
  CacheStale,
}

impl CacheSource {
  pub fn label(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::CacheFresh => "cache",
      Self::CacheStale => "cache (stale)",
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn record_aged(age: chrono::Duration, stale_time: Duration) -> QueryRecord {
    QueryRecord {
      data: Some(json!({"title": "Home"})),
      data_updated_at: Some(Utc::now() - age),
      status: QueryStatus::Success,
      ..QueryRecord::pending(QueryKey::new(["home"]), stale_time)
    }
  }

  #[test]
  fn test_query_hash_is_json_array() {
    assert_eq!(QueryKey::new(["home"]).query_hash(), r#"["home"]"#);
    assert_eq!(
      QueryKey::new(["press-articles", "page-2"]).query_hash(),
      r#"["press-articles","page-2"]"#
    );
  }

  #[test]
  fn test_display_joins_segments() {
    assert_eq!(QueryKey::new(["projects", "42"]).to_string(), "projects/42");
  }

  #[test]
  fn test_fresh_record_is_not_stale() {
    let record = record_aged(chrono::Duration::minutes(1), Duration::from_secs(300));
    assert!(!record.is_stale_at(Utc::now()));
  }

  #[test]
  fn test_old_record_is_stale() {
    let record = record_aged(chrono::Duration::minutes(6), Duration::from_secs(300));
    assert!(record.is_stale_at(Utc::now()));
  }

  #[test]
  fn test_record_without_data_is_stale() {
    let record = QueryRecord::pending(QueryKey::new(["about"]), Duration::from_secs(300));
    assert!(record.is_stale_at(Utc::now()));
    assert!(!record.is_expired_at(Utc::now(), Duration::ZERO));
  }

  #[test]
  fn test_expiry_is_independent_of_stale_time() {
    let record = record_aged(chrono::Duration::hours(25), Duration::from_secs(60 * 60 * 48));
    assert!(!record.is_stale_at(Utc::now()));
    assert!(record.is_expired_at(Utc::now(), Duration::from_secs(24 * 60 * 60)));
  }

  #[test]
  fn test_future_timestamp_counts_as_fresh() {
    let record = record_aged(chrono::Duration::minutes(-5), Duration::ZERO);
    assert_eq!(record.age(Utc::now()), Some(Duration::ZERO));
    assert!(!record.is_stale_at(Utc::now()));
  }
}
