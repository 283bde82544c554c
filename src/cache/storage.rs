//! Entry storage trait with SQLite and in-memory implementations.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::traits::EntryId;

/// Trait for durable entry storage backends.
///
/// Backends store opaque encoded records; envelope handling lives in the
/// cache layer. Every entry id maps to its own slot, so writes to different
/// entries never contend on content.
pub trait EntryStore: Send + Sync + 'static {
  /// Load the raw record for an entry.
  fn load(&self, id: &EntryId) -> Result<Option<Vec<u8>>>;

  /// Replace the raw record for an entry.
  fn save(&self, id: &EntryId, record: &[u8]) -> Result<()>;

  /// All entry ids currently persisted.
  fn ids(&self) -> Result<Vec<EntryId>>;
}

/// Volatile storage. Used for tests and `--ephemeral` runs.
#[derive(Default)]
pub struct MemoryStore {
  records: Mutex<BTreeMap<EntryId, Vec<u8>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl EntryStore for MemoryStore {
  fn load(&self, id: &EntryId) -> Result<Option<Vec<u8>>> {
    let records = self
      .records
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(records.get(id).cloned())
  }

  fn save(&self, id: &EntryId, record: &[u8]) -> Result<()> {
    let mut records = self
      .records
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    records.insert(id.clone(), record.to_vec());
    Ok(())
  }

  fn ids(&self) -> Result<Vec<EntryId>> {
    let records = self
      .records
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(records.keys().cloned().collect())
  }
}

/// SQLite-based entry storage.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open or create the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create state directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open state database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
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
    Ok(crate::config::data_dir()?.join("state.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(STATE_SCHEMA)
      .map_err(|e| eyre!("Failed to run state migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for the entry table.
const STATE_SCHEMA: &str = r#"
-- One row per (feature, sub-key); data is the encoded envelope
CREATE TABLE IF NOT EXISTS sync_entries (
    feature_type TEXT NOT NULL,
    sub_key TEXT NOT NULL,
    data BLOB NOT NULL,
    saved_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (feature_type, sub_key)
);
"#;

impl EntryStore for SqliteStore {
  fn load(&self, id: &EntryId) -> Result<Option<Vec<u8>>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT data FROM sync_entries WHERE feature_type = ? AND sub_key = ?",
        params![id.feature(), id.sub_key()],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to load entry {}: {}", id, e))
  }

  fn save(&self, id: &EntryId, record: &[u8]) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO sync_entries (feature_type, sub_key, data, saved_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![id.feature(), id.sub_key(), record],
      )
      .map_err(|e| eyre!("Failed to store entry {}: {}", id, e))?;

    Ok(())
  }

  fn ids(&self) -> Result<Vec<EntryId>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT feature_type, sub_key FROM sync_entries ORDER BY feature_type, sub_key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let ids = stmt
      .query_map([], |row| {
        Ok(EntryId::new(
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query entries: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entry ids: {}", e))?;

    Ok(ids)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn exercise(store: &dyn EntryStore) {
    let tank = EntryId::main("tank");
    let siege = EntryId::new("research", "siege");

    assert_eq!(store.load(&tank).unwrap(), None);

    store.save(&tank, b"one").unwrap();
    store.save(&siege, b"two").unwrap();
    store.save(&tank, b"three").unwrap();

    assert_eq!(store.load(&tank).unwrap(), Some(b"three".to_vec()));
    assert_eq!(store.ids().unwrap(), vec![siege, tank]);
  }

  #[test]
  fn test_memory_store() {
    exercise(&MemoryStore::new());
  }

  #[test]
  fn test_sqlite_store() {
    exercise(&SqliteStore::open_in_memory().unwrap());
  }

  #[test]
  fn test_sqlite_store_persists_across_reopen() {
    let dir = std::env::temp_dir().join(format!("statesync-test-{}", std::process::id()));
    let path = dir.join("state.db");
    let id = EntryId::new("tank", "alpha");

    {
      let store = SqliteStore::open(&path).unwrap();
      store.save(&id, b"{}").unwrap();
    }

    let reopened = SqliteStore::open(&path).unwrap();
    assert_eq!(reopened.load(&id).unwrap(), Some(b"{}".to_vec()));

    let _ = std::fs::remove_dir_all(&dir);
  }
}
