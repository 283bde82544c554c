//! In-memory stand-in for the state server.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::cache::{Entry, EntryId, EntryStore, MemoryStore, Timestamp};
use crate::remote::{Credential, PushOptions, RemoteState, StateTransport, TransportError};

use super::service::{SyncOptions, SyncService};

pub(crate) fn credential() -> Credential {
  Credential::new("test-token")
}

#[derive(Debug, Clone)]
pub(crate) struct PushRecord {
  pub id: EntryId,
  pub state: Value,
  pub options: PushOptions,
}

#[derive(Default)]
struct Inner {
  server: Mutex<BTreeMap<EntryId, RemoteState>>,
  pushes: Mutex<Vec<PushRecord>>,
  attempted_pushes: AtomicUsize,
  state_fetches: AtomicUsize,
  manifest_fetches: AtomicUsize,
  bulk_fetches: AtomicUsize,
  fail_pushes: AtomicBool,
  fail_reads: AtomicBool,
  manifest_gate: Mutex<Option<Arc<Notify>>>,
  server_clock: Mutex<Option<Timestamp>>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeTransport {
  inner: Arc<Inner>,
}

fn unavailable() -> TransportError {
  TransportError::Status {
    status: 503,
    body: "unavailable".into(),
  }
}

impl FakeTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn put_server(&self, id: &EntryId, state: Value, updated_at: Timestamp) {
    self
      .inner
      .server
      .lock()
      .unwrap()
      .insert(id.clone(), RemoteState { state, updated_at });
  }

  pub fn server_timestamp(&self, id: &EntryId) -> Option<Timestamp> {
    let server = self.inner.server.lock().unwrap();
    server.get(id).map(|s| s.updated_at.clone())
  }

  /// Successful pushes, oldest first.
  pub fn pushes(&self) -> Vec<PushRecord> {
    self.inner.pushes.lock().unwrap().clone()
  }

  pub fn attempted_pushes(&self) -> usize {
    self.inner.attempted_pushes.load(Ordering::SeqCst)
  }

  pub fn state_fetches(&self) -> usize {
    self.inner.state_fetches.load(Ordering::SeqCst)
  }

  pub fn manifest_fetches(&self) -> usize {
    self.inner.manifest_fetches.load(Ordering::SeqCst)
  }

  pub fn bulk_fetches(&self) -> usize {
    self.inner.bulk_fetches.load(Ordering::SeqCst)
  }

  pub fn fail_pushes(&self, fail: bool) {
    self.inner.fail_pushes.store(fail, Ordering::SeqCst);
  }

  pub fn fail_reads(&self, fail: bool) {
    self.inner.fail_reads.store(fail, Ordering::SeqCst);
  }

  /// Answer every push with this `updated_at`, as a server whose clock
  /// differs from ours.
  pub fn set_server_clock(&self, now: Timestamp) {
    *self.inner.server_clock.lock().unwrap() = Some(now);
  }

  /// Block manifest fetches until the returned gate is notified.
  pub fn hold_manifest(&self) -> Arc<Notify> {
    let gate = Arc::new(Notify::new());
    *self.inner.manifest_gate.lock().unwrap() = Some(Arc::clone(&gate));
    gate
  }

  fn reads_failing(&self) -> bool {
    self.inner.fail_reads.load(Ordering::SeqCst)
  }
}

impl StateTransport for FakeTransport {
  async fn fetch_state(
    &self,
    id: &EntryId,
    _credential: &Credential,
  ) -> Result<Option<RemoteState>, TransportError> {
    self.inner.state_fetches.fetch_add(1, Ordering::SeqCst);
    if self.reads_failing() {
      return Err(unavailable());
    }
    Ok(self.inner.server.lock().unwrap().get(id).cloned())
  }

  async fn put_state(
    &self,
    id: &EntryId,
    state: &Value,
    _credential: &Credential,
    options: PushOptions,
  ) -> Result<Timestamp, TransportError> {
    self.inner.attempted_pushes.fetch_add(1, Ordering::SeqCst);
    if self.inner.fail_pushes.load(Ordering::SeqCst) {
      return Err(unavailable());
    }

    let mut server = self.inner.server.lock().unwrap();
    // Server time never repeats, even within one millisecond
    let latest = server
      .values()
      .map(|s| s.updated_at.clone())
      .max()
      .unwrap_or_else(Timestamp::never);
    let fixed = self.inner.server_clock.lock().unwrap().clone();
    let updated_at = fixed.unwrap_or_else(|| Timestamp::now_after(&latest));
    server.insert(
      id.clone(),
      RemoteState {
        state: state.clone(),
        updated_at: updated_at.clone(),
      },
    );
    self.inner.pushes.lock().unwrap().push(PushRecord {
      id: id.clone(),
      state: state.clone(),
      options,
    });
    Ok(updated_at)
  }

  async fn fetch_manifest(
    &self,
    _credential: &Credential,
  ) -> Result<Vec<(EntryId, Timestamp)>, TransportError> {
    self.inner.manifest_fetches.fetch_add(1, Ordering::SeqCst);
    let gate = self.inner.manifest_gate.lock().unwrap().clone();
    if let Some(gate) = gate {
      gate.notified().await;
    }
    if self.reads_failing() {
      return Err(unavailable());
    }

    let server = self.inner.server.lock().unwrap();
    Ok(
      server
        .iter()
        .map(|(id, s)| (id.clone(), s.updated_at.clone()))
        .collect(),
    )
  }

  async fn fetch_all(
    &self,
    _credential: &Credential,
  ) -> Result<Vec<(EntryId, RemoteState)>, TransportError> {
    self.inner.bulk_fetches.fetch_add(1, Ordering::SeqCst);
    if self.reads_failing() {
      return Err(unavailable());
    }

    let server = self.inner.server.lock().unwrap();
    Ok(server.iter().map(|(id, s)| (id.clone(), s.clone())).collect())
  }
}

impl SyncService<MemoryStore, FakeTransport> {
  pub(crate) fn for_tests(transport: FakeTransport) -> Self {
    Self::new(MemoryStore::default(), transport, SyncOptions::default())
  }

  /// Start from entries that were persisted by an earlier session.
  pub(crate) fn for_tests_seeded(transport: FakeTransport, entries: &[(EntryId, Entry)]) -> Self {
    let storage = MemoryStore::default();
    for (id, entry) in entries {
      let record = json!({
        "v": entry.version,
        "state": entry.state,
        "lastModifiedAt": entry.last_modified_at,
        "lastSyncedAt": entry.last_synced_at,
      });
      storage
        .save(id, &serde_json::to_vec(&record).unwrap())
        .unwrap();
    }
    Self::new(storage, transport, SyncOptions::default())
  }
}
