//! Background reconciler: cheap manifest check, then pull entries that
//! changed remotely and carry no local edits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{EntryId, EntryStore, Timestamp};
use crate::remote::{Credential, RemoteState, StateTransport};

use super::service::Shared;

/// Result of a `reconcile` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
  /// The freshness window has not elapsed since the last check
  Fresh,
  /// Another reconciliation is already running
  InFlight,
  /// The manifest could not be fetched
  Failed,
  /// Pass finished; lists the entries overwritten from the server
  Completed { pulled: Vec<EntryId> },
}

/// Process-wide "last checked" time plus the reentrancy flag.
#[derive(Default)]
pub(crate) struct ReconcileGuard {
  last_checked: Mutex<Option<Instant>>,
  running: AtomicBool,
}

/// Clears the running flag when a pass ends, however it ends.
struct Running<'a>(&'a AtomicBool);

impl Drop for Running<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

impl ReconcileGuard {
  fn last_checked(&self) -> MutexGuard<'_, Option<Instant>> {
    self.last_checked.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn try_begin(&self) -> Option<Running<'_>> {
    self
      .running
      .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
      .ok()
      .map(|_| Running(&self.running))
  }

  fn is_due(&self, window: Duration) -> bool {
    match *self.last_checked() {
      Some(checked) => checked.elapsed() >= window,
      None => true,
    }
  }

  pub(crate) fn mark_checked(&self) {
    *self.last_checked() = Some(Instant::now());
  }

  /// Make the next `reconcile` run regardless of the window.
  pub(crate) fn invalidate(&self) {
    *self.last_checked() = None;
  }
}

impl<S: EntryStore, T: StateTransport> Shared<S, T> {
  pub(crate) async fn reconcile(&self, credential: &Credential) -> ReconcileOutcome {
    let Some(_running) = self.reconcile.try_begin() else {
      debug!("Reconciliation already in flight");
      return ReconcileOutcome::InFlight;
    };
    if !self.reconcile.is_due(self.options.freshness_window) {
      return ReconcileOutcome::Fresh;
    }
    // Stamped up front so a failing server is not hammered
    self.reconcile.mark_checked();

    let manifest = match self.transport.fetch_manifest(credential).await {
      Ok(manifest) => manifest,
      Err(e) => {
        warn!(error = %e, "Manifest fetch failed");
        return ReconcileOutcome::Failed;
      }
    };

    let checked = manifest.len();
    let mut pulled = Vec::new();
    for (id, server_ts) in manifest {
      if !self.is_stale(&id, &server_ts) {
        continue;
      }

      match self.transport.fetch_state(&id, credential).await {
        Ok(Some(remote)) => {
          if self.absorb(&id, remote) {
            pulled.push(id);
          }
        }
        Ok(None) => debug!(entry = %id, "Entry listed in manifest but not found"),
        Err(e) => warn!(entry = %id, error = %e, "Pull failed"),
      }
    }

    info!(checked, pulled = pulled.len(), "Reconciliation finished");
    ReconcileOutcome::Completed { pulled }
  }

  /// Whether the server copy should replace the local one.
  ///
  /// A dirty entry is never stale: a newer server time then reflects our own
  /// push still landing, not an external edit.
  fn is_stale(&self, id: &EntryId, server_ts: &Timestamp) -> bool {
    match self.store.read(id) {
      None => true,
      Some(local) => local.is_clean() && *server_ts > local.last_synced_at,
    }
  }

  /// Store a pulled snapshot and notify listeners, unless a local edit
  /// landed while the pull was in flight.
  pub(crate) fn absorb(&self, id: &EntryId, remote: RemoteState) -> bool {
    match self.store.write_if_clean(id, remote.state, remote.updated_at) {
      Some(entry) => {
        debug!(entry = %id, updated_at = %entry.last_synced_at, "Pulled entry from server");
        self.listeners.notify(id, &entry.state);
        true
      }
      None => {
        debug!(entry = %id, "Entry edited during pull; keeping local state");
        false
      }
    }
  }
}
