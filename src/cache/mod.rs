//! Durable entry cache for local-first state.
//!
//! This module provides the storage half of synchronization:
//! - Keys entries by `(feature, sub-key)`
//! - Tracks `last_modified_at` / `last_synced_at` to derive dirtiness
//! - Persists a versioned envelope and upgrades bare legacy payloads on read
//! - Degrades to in-memory operation when persistence fails

mod envelope;
mod layer;
mod storage;
mod traits;

pub use layer::CacheStore;
pub use storage::{EntryStore, MemoryStore, SqliteStore};
pub use traits::{Entry, EntryId, Timestamp, Touch, DEFAULT_SUB_KEY};
