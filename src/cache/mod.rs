//! Persistent query cache.
//!
//! This module provides the client-side data layer that:
//! - Keeps the last payload of every query keyed by a logical [`QueryKey`]
//! - Serves stale data while refreshing it in the background
//! - Persists a versioned snapshot of all queries to durable storage
//! - Purges snapshots written by other builds before anything is read

pub mod devtools;
mod layer;
mod snapshot;
mod storage;
mod traits;
mod version;

pub use layer::{CacheSettings, QueryCache};
pub use storage::{data_dir, NoopStorage, SnapshotStore, SqliteStorage};
pub use traits::{CacheResult, CacheSource, QueryKey, QueryStatus};
pub use version::{GateOutcome, VersionGate, CACHE_VERSION, DEFAULT_PREFIX};

#[cfg(test)]
pub use snapshot::CacheSnapshot;
#[cfg(test)]
pub use storage::MemoryStorage;
#[cfg(test)]
pub use traits::QueryRecord;
