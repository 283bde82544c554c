//! Cache store: the in-process view of every entry, backed by best-effort
//! durable storage.

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::envelope::{self, ENVELOPE_VERSION};
use super::storage::EntryStore;
use super::traits::{Entry, EntryId, Timestamp, Touch};

/// Keyed entry store.
///
/// The in-memory map is authoritative for the running process. Every write
/// is also persisted to the storage backend; when persistence fails (quota,
/// I/O) the write still succeeds in memory and a warning is logged.
pub struct CacheStore<S: EntryStore> {
  storage: Arc<S>,
  entries: Mutex<HashMap<EntryId, Entry>>,
}

impl<S: EntryStore> CacheStore<S> {
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      entries: Mutex::new(HashMap::new()),
    }
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<EntryId, Entry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Read an entry, loading and upgrading it from storage on first access.
  pub fn read(&self, id: &EntryId) -> Option<Entry> {
    let mut entries = self.entries();
    self.current(&mut entries, id)
  }

  fn current(&self, entries: &mut HashMap<EntryId, Entry>, id: &EntryId) -> Option<Entry> {
    if let Some(entry) = entries.get(id) {
      return Some(entry.clone());
    }

    let entry = self.load(id)?;
    entries.insert(id.clone(), entry.clone());
    Some(entry)
  }

  /// Read an entry, creating it from `default` if absent.
  ///
  /// A default-created entry is clean and never synced, so it is neither
  /// pushed nor protected from the first server pull.
  pub fn get_or_insert(&self, id: &EntryId, default: Value) -> Entry {
    let mut entries = self.entries();
    if let Some(entry) = self.current(&mut entries, id) {
      return entry;
    }

    let entry = Entry {
      state: default,
      last_modified_at: Timestamp::never(),
      last_synced_at: Timestamp::never(),
      version: ENVELOPE_VERSION,
    };
    entries.insert(id.clone(), entry.clone());
    self.persist(id, &entry);
    entry
  }

  /// Replace an entry's state.
  pub fn write(&self, id: &EntryId, state: Value, touch: Touch) -> Entry {
    let mut entries = self.entries();
    let previous = self.current(&mut entries, id);
    let entry = stamp(previous, state, touch);

    entries.insert(id.clone(), entry.clone());
    self.persist(id, &entry);
    entry
  }

  /// Store server data unless the entry holds unsynced local edits.
  ///
  /// Returns `None`, leaving the entry untouched, when it is dirty.
  pub fn write_if_clean(&self, id: &EntryId, state: Value, server_ts: Timestamp) -> Option<Entry> {
    let mut entries = self.entries();
    let previous = self.current(&mut entries, id);
    if previous.as_ref().is_some_and(Entry::is_dirty) {
      return None;
    }
    let entry = stamp(previous, state, Touch::Synced(server_ts));

    entries.insert(id.clone(), entry.clone());
    self.persist(id, &entry);
    Some(entry)
  }

  /// Record a server acknowledgment for `pushed` without touching state.
  ///
  /// Returns `None` when the entry is missing or its state is no longer the
  /// one that was pushed; a newer local edit must stay dirty. `last_synced_at`
  /// never moves backwards.
  pub fn mark_synced(&self, id: &EntryId, pushed: &Value, server_ts: Timestamp) -> Option<Entry> {
    let mut entries = self.entries();
    let mut entry = self.current(&mut entries, id)?;
    if entry.state != *pushed {
      return None;
    }
    if server_ts > entry.last_synced_at {
      entry.last_synced_at = server_ts;
    }
    // The acknowledged state is the current one, so the entry is clean even
    // when the local clock runs ahead of the server's
    if entry.last_modified_at > entry.last_synced_at {
      entry.last_modified_at = entry.last_synced_at.clone();
    }
    entry.version = ENVELOPE_VERSION;

    entries.insert(id.clone(), entry.clone());
    self.persist(id, &entry);
    Some(entry)
  }

  /// All known entry ids, persisted or in memory.
  pub fn ids(&self) -> Vec<EntryId> {
    let mut ids: BTreeSet<EntryId> = self.entries().keys().cloned().collect();
    match self.storage.ids() {
      Ok(stored) => ids.extend(stored),
      Err(e) => warn!(error = %e, "Failed to list stored entries"),
    }
    ids.into_iter().collect()
  }

  pub fn is_empty(&self) -> bool {
    self.ids().is_empty()
  }

  fn load(&self, id: &EntryId) -> Option<Entry> {
    let raw = match self.storage.load(id) {
      Ok(raw) => raw?,
      Err(e) => {
        warn!(entry = %id, error = %e, "Failed to load entry");
        return None;
      }
    };

    match envelope::decode(&raw) {
      Ok(entry) => {
        if entry.version < ENVELOPE_VERSION {
          debug!(entry = %id, "Upgraded legacy entry");
        }
        Some(entry)
      }
      Err(e) => {
        warn!(entry = %id, error = %e, "Discarding unreadable entry");
        None
      }
    }
  }

  fn persist(&self, id: &EntryId, entry: &Entry) {
    let result = envelope::encode(entry).and_then(|raw| self.storage.save(id, &raw));
    if let Err(e) = result {
      warn!(entry = %id, error = %e, "Persisting entry failed; keeping in-memory value");
    }
  }
}

/// Build the next version of an entry from its previous one.
fn stamp(previous: Option<Entry>, state: Value, touch: Touch) -> Entry {
  match (touch, previous) {
    (Touch::Local, Some(prev)) => Entry {
      state,
      last_modified_at: Timestamp::now_after(&prev.last_synced_at),
      last_synced_at: prev.last_synced_at,
      version: ENVELOPE_VERSION,
    },
    (Touch::Local, None) => Entry {
      state,
      last_modified_at: Timestamp::now(),
      last_synced_at: Timestamp::never(),
      version: ENVELOPE_VERSION,
    },
    (Touch::Synced(server_ts), Some(prev)) => Entry {
      state,
      last_synced_at: prev.last_synced_at.max(server_ts),
      last_modified_at: prev.last_modified_at,
      version: ENVELOPE_VERSION,
    },
    (Touch::Synced(server_ts), None) => Entry {
      state,
      last_modified_at: server_ts.clone(),
      last_synced_at: server_ts,
      version: ENVELOPE_VERSION,
    },
  }
}
