//! The synchronization service that features talk to.

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::cache::{CacheStore, Entry, EntryId, EntryStore, Timestamp, Touch};
use crate::config::SyncConfig;
use crate::lifecycle::Lifecycle;
use crate::remote::{Credential, PushOptions, StateTransport};

use super::bulk::LoginSync;
use super::debounce::DebounceRegistry;
use super::listeners::{ListenerRegistry, Subscription};
use super::push::{PushLocks, PushOutcome};
use super::reconcile::{ReconcileGuard, ReconcileOutcome};

/// Timing knobs for the service.
#[derive(Debug, Clone)]
pub struct SyncOptions {
  /// Quiet period before a scheduled push fires
  pub debounce: Duration,
  /// Minimum interval between manifest checks
  pub freshness_window: Duration,
  /// Period of the background poller
  pub poll_interval: Duration,
}

impl From<&SyncConfig> for SyncOptions {
  fn from(config: &SyncConfig) -> Self {
    Self {
      debounce: config.debounce(),
      freshness_window: config.freshness_window(),
      poll_interval: config.poll_interval(),
    }
  }
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self::from(&SyncConfig::default())
  }
}

/// Sync state of one entry, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryStatus {
  pub id: EntryId,
  pub dirty: bool,
  /// A debounced push is waiting to fire
  pub pending: bool,
  pub last_modified_at: Timestamp,
  pub last_synced_at: Timestamp,
}

/// Everything the service owns. The registries live here, not in globals,
/// so each service instance is isolated.
pub(crate) struct Shared<S: EntryStore, T: StateTransport> {
  pub(crate) store: CacheStore<S>,
  pub(crate) transport: T,
  pub(crate) options: SyncOptions,
  pub(crate) push_locks: PushLocks,
  pub(crate) debounce: DebounceRegistry,
  pub(crate) reconcile: ReconcileGuard,
  pub(crate) listeners: Arc<ListenerRegistry>,
}

/// Local-first state synchronization.
///
/// Reads and writes are served from the cache immediately; pushes, pulls and
/// manifest checks run asynchronously and never block the caller. Methods
/// that schedule work (`write` with a credential, `mount`, `spawn_poller`)
/// must be called from within a tokio runtime.
pub struct SyncService<S: EntryStore, T: StateTransport> {
  pub(crate) shared: Arc<Shared<S, T>>,
}

impl<S: EntryStore, T: StateTransport> Clone for SyncService<S, T> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<S: EntryStore, T: StateTransport> SyncService<S, T> {
  pub fn new(storage: S, transport: T, options: SyncOptions) -> Self {
    Self {
      shared: Arc::new(Shared {
        store: CacheStore::new(storage),
        transport,
        options,
        push_locks: PushLocks::default(),
        debounce: DebounceRegistry::default(),
        reconcile: ReconcileGuard::default(),
        listeners: Arc::new(ListenerRegistry::default()),
      }),
    }
  }

  /// Raw cache entry, including timestamps.
  pub fn entry(&self, id: &EntryId) -> Option<Entry> {
    self.shared.store.read(id)
  }

  /// Read an entry's state as `V`.
  ///
  /// Returns `None` when the entry doesn't exist or no longer decodes as `V`.
  pub fn read<V: DeserializeOwned>(&self, id: &EntryId) -> Option<V> {
    let entry = self.shared.store.read(id)?;
    decode_state(id, entry.state)
  }

  /// Write new local state, marking the entry dirty.
  ///
  /// With a credential the entry's debounced push is (re)scheduled; without
  /// one the edit stays local until a later push.
  pub fn write<V: Serialize>(
    &self,
    id: &EntryId,
    value: &V,
    credential: Option<&Credential>,
  ) -> Result<Entry> {
    let state = serde_json::to_value(value)
      .map_err(|e| eyre!("Failed to serialize state for {}: {}", id, e))?;

    let entry = self.shared.store.write(id, state, Touch::Local);
    if let Some(credential) = credential {
      self.shared.schedule(id, credential);
    }
    Ok(entry)
  }

  /// Attach a feature to an entry.
  ///
  /// Returns the current state (creating the entry from `default` if
  /// needed), re-schedules a push for leftover dirty state, and kicks off a
  /// background reconciliation.
  pub fn mount<V: Serialize + DeserializeOwned>(
    &self,
    id: &EntryId,
    default: V,
    credential: Option<&Credential>,
  ) -> Result<V> {
    let default_state = serde_json::to_value(&default)
      .map_err(|e| eyre!("Failed to serialize default for {}: {}", id, e))?;
    let entry = self.shared.store.get_or_insert(id, default_state);

    if let Some(credential) = credential {
      if entry.is_dirty() && !self.shared.debounce.is_pending(id) {
        debug!(entry = %id, "Mounted with unsynced edits; scheduling push");
        self.shared.schedule(id, credential);
      }

      let shared = Arc::clone(&self.shared);
      let credential = credential.clone();
      tokio::spawn(async move {
        shared.reconcile(&credential).await;
      });
    }

    Ok(decode_state(id, entry.state).unwrap_or(default))
  }

  /// Call `callback` whenever server data overwrites `id`.
  pub fn subscribe<V, F>(&self, id: &EntryId, callback: F) -> Subscription
  where
    V: DeserializeOwned,
    F: Fn(V) + Send + Sync + 'static,
  {
    let entry_id = id.clone();
    self.shared.listeners.register(
      id,
      Arc::new(move |state: &Value| {
        if let Some(value) = decode_state(&entry_id, state.clone()) {
          callback(value);
        }
      }),
    )
  }

  /// Restart the debounce window for `id`.
  pub fn schedule(&self, id: &EntryId, credential: &Credential) {
    self.shared.schedule(id, credential);
  }

  pub fn has_pending_push(&self, id: &EntryId) -> bool {
    self.shared.debounce.is_pending(id)
  }

  pub fn pending_pushes(&self) -> usize {
    self.shared.debounce.len()
  }

  /// Push an explicit snapshot now.
  pub async fn push(
    &self,
    id: &EntryId,
    state: Value,
    credential: &Credential,
    options: PushOptions,
  ) -> PushOutcome {
    self.shared.push(id, state, credential, options).await
  }

  /// Push every dirty entry now, one after another.
  pub async fn push_dirty(&self, credential: &Credential) -> Vec<(EntryId, PushOutcome)> {
    let mut outcomes = Vec::new();
    for id in self.shared.store.ids() {
      if self.shared.store.read(&id).is_some_and(|e| e.is_dirty()) {
        let outcome = self
          .shared
          .push_latest(&id, credential, PushOptions::default())
          .await;
        outcomes.push((id, outcome));
      }
    }
    outcomes
  }

  /// Cancel pending timers and push those entries immediately.
  pub async fn flush_all(&self) -> Vec<(EntryId, PushOutcome)> {
    self.shared.flush_all().await
  }

  /// Flush on either host transition.
  pub async fn on_lifecycle(&self, event: Lifecycle) -> Vec<(EntryId, PushOutcome)> {
    debug!(?event, "Lifecycle transition");
    match event {
      Lifecycle::Hidden | Lifecycle::Unload => self.flush_all().await,
    }
  }

  /// Pull entries that changed on the server, at most once per freshness
  /// window.
  pub async fn reconcile(&self, credential: &Credential) -> ReconcileOutcome {
    self.shared.reconcile(credential).await
  }

  /// Let the next `reconcile` run regardless of the freshness window.
  pub fn invalidate_freshness(&self) {
    self.shared.reconcile.invalidate();
  }

  /// Hydrate an empty cache, or force a reconciliation for a populated one.
  pub async fn on_login(&self, credential: &Credential) -> LoginSync {
    self.shared.on_login(credential).await
  }

  /// Run `reconcile` on a fixed period until the handle is aborted.
  pub fn spawn_poller(&self, credential: Credential) -> JoinHandle<()> {
    let shared = Arc::clone(&self.shared);
    let period = shared.options.poll_interval;

    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        shared.reconcile(&credential).await;
      }
    })
  }

  /// Per-entry sync state.
  pub fn status(&self) -> Vec<EntryStatus> {
    self
      .shared
      .store
      .ids()
      .into_iter()
      .filter_map(|id| {
        let entry = self.shared.store.read(&id)?;
        Some(EntryStatus {
          dirty: entry.is_dirty(),
          pending: self.shared.debounce.is_pending(&id),
          last_modified_at: entry.last_modified_at,
          last_synced_at: entry.last_synced_at,
          id,
        })
      })
      .collect()
  }
}

fn decode_state<V: DeserializeOwned>(id: &EntryId, state: Value) -> Option<V> {
  match serde_json::from_value(state) {
    Ok(value) => Some(value),
    Err(e) => {
      warn!(entry = %id, error = %e, "Stored state does not match the requested type");
      None
    }
  }
}
