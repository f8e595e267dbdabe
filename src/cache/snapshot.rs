//! Serialized form of the query cache kept in durable storage.
//!
//! The layout is a JSON document:
//!
//! ```json
//! {
//!   "clientState": {
//!     "queries": [
//!       { "queryKey": ["home"], "queryHash": "[\"home\"]",
//!         "state": { "data": {}, "dataUpdatedAt": 1700000000000, "status": "success" } }
//!     ]
//!   },
//!   "timestamp": 1700000000000,
//!   "buster": "v1"
//! }
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::traits::{QueryKey, QueryRecord, QueryStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
  pub client_state: ClientState,
  /// When the snapshot was written (epoch millis)
  pub timestamp: i64,
  /// Version tag of the build that wrote the snapshot
  #[serde(default)]
  pub buster: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientState {
  pub queries: Vec<DehydratedQuery>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DehydratedQuery {
  pub query_key: QueryKey,
  pub query_hash: String,
  pub state: DehydratedState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DehydratedState {
  pub data: Value,
  pub data_updated_at: i64,
  pub status: QueryStatus,
}

impl CacheSnapshot {
  /// Build a snapshot from records. Only successful records with data are kept.
  pub fn from_records<'a, I>(records: I, written_at: DateTime<Utc>, buster: &str) -> Self
  where
    I: IntoIterator<Item = &'a QueryRecord>,
  {
    let mut queries: Vec<DehydratedQuery> = records
      .into_iter()
      .filter(|record| record.status == QueryStatus::Success)
      .filter_map(|record| {
        let data = record.data.clone()?;
        let updated_at = record.data_updated_at?;
        Some(DehydratedQuery {
          query_key: record.key.clone(),
          query_hash: record.key.query_hash(),
          state: DehydratedState {
            data,
            data_updated_at: updated_at.timestamp_millis(),
            status: QueryStatus::Success,
          },
        })
      })
      .collect();

    // HashMap iteration order is arbitrary
    queries.sort_by(|a, b| a.query_hash.cmp(&b.query_hash));

    Self {
      client_state: ClientState { queries },
      timestamp: written_at.timestamp_millis(),
      buster: buster.to_string(),
    }
  }

  /// Rehydrate records, giving each the supplied stale time.
  pub fn into_records(self, stale_time: Duration) -> Vec<QueryRecord> {
    self
      .client_state
      .queries
      .into_iter()
      .map(|query| QueryRecord {
        key: query.query_key,
        data: Some(query.state.data),
        data_updated_at: from_millis(query.state.data_updated_at),
        stale_time,
        status: query.state.status,
        error: None,
      })
      .collect()
  }

  pub fn written_at(&self) -> Option<DateTime<Utc>> {
    from_millis(self.timestamp)
  }

  pub fn query_keys(&self) -> impl Iterator<Item = &QueryKey> {
    self.client_state.queries.iter().map(|query| &query.query_key)
  }

  pub fn len(&self) -> usize {
    self.client_state.queries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.client_state.queries.is_empty()
  }

  pub fn encode(&self) -> serde_json::Result<String> {
    serde_json::to_string(self)
  }

  pub fn decode(raw: &str) -> serde_json::Result<Self> {
    serde_json::from_str(raw)
  }
}

fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
  Utc.timestamp_millis_opt(millis).single()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn success(key: &str, data: Value) -> QueryRecord {
    QueryRecord {
      data: Some(data),
      data_updated_at: Some(Utc.timestamp_millis_opt(1_700_000_000_123).unwrap()),
      status: QueryStatus::Success,
      ..QueryRecord::pending(QueryKey::new([key]), Duration::from_secs(300))
    }
  }

  #[test]
  fn test_wire_format_field_names() {
    let records = [success("home", json!({"hero": "Studio"}))];
    let snapshot = CacheSnapshot::from_records(&records, Utc::now(), "v1");
    let value: Value = serde_json::from_str(&snapshot.encode().unwrap()).unwrap();

    let query = &value["clientState"]["queries"][0];
    assert_eq!(query["queryKey"], json!(["home"]));
    assert_eq!(query["queryHash"], json!(r#"["home"]"#));
    assert_eq!(query["state"]["data"], json!({"hero": "Studio"}));
    assert_eq!(query["state"]["dataUpdatedAt"], json!(1_700_000_000_123i64));
    assert_eq!(query["state"]["status"], json!("success"));
    assert!(value["timestamp"].is_i64());
    assert_eq!(value["buster"], json!("v1"));
  }

  #[test]
  fn test_only_successful_records_are_dehydrated() {
    let mut failed = success("about", json!({"bio": "old"}));
    failed.status = QueryStatus::Error;
    let pending = QueryRecord::pending(QueryKey::new(["connect"]), Duration::from_secs(60));
    let records = [success("home", json!(1)), failed, pending];

    let snapshot = CacheSnapshot::from_records(&records, Utc::now(), "v1");
    let keys: Vec<String> = snapshot.query_keys().map(ToString::to_string).collect();
    assert_eq!(keys, vec!["home".to_string()]);
  }

  #[test]
  fn test_reload_preserves_keys_and_payloads() {
    let records = [
      success("home", json!({"hero": {"title": "Ateliér", "images": [1, 2, 3]}})),
      success("press-articles", json!([{"id": 7, "title": "Review"}])),
    ];
    let snapshot = CacheSnapshot::from_records(&records, Utc::now(), "v1");
    let raw = snapshot.encode().unwrap();
    let restored = CacheSnapshot::decode(&raw).unwrap();
    assert_eq!(restored, snapshot);

    let mut rehydrated = restored.into_records(Duration::from_secs(300));
    rehydrated.sort_by(|a, b| a.key.query_hash().cmp(&b.key.query_hash()));
    assert_eq!(rehydrated.len(), 2);
    assert_eq!(rehydrated[0].data, records[0].data);
    assert_eq!(rehydrated[0].data_updated_at, records[0].data_updated_at);
    assert_eq!(rehydrated[1].data, records[1].data);
    assert_eq!(
      serde_json::to_string(&rehydrated[1].data).unwrap(),
      serde_json::to_string(&records[1].data).unwrap()
    );
  }

  #[test]
  fn test_missing_buster_defaults_to_empty() {
    let raw = r#"{"clientState":{"queries":[]},"timestamp":0}"#;
    let snapshot = CacheSnapshot::decode(raw).unwrap();
    assert!(snapshot.buster.is_empty());
    assert!(snapshot.is_empty());
  }

  #[test]
  fn test_corrupt_document_fails_to_decode() {
    assert!(CacheSnapshot::decode("{\"clientState\":").is_err());
    assert!(CacheSnapshot::decode("[]").is_err());
  }
}
