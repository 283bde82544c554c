//! Debounce/flush registry: one delayed push per entry, flushed immediately
//! when the host is hidden or unloading.

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::cache::{EntryId, EntryStore};
use crate::remote::{Credential, PushOptions, StateTransport};

use super::push::PushOutcome;
use super::service::Shared;

struct PendingPush {
  /// Distinguishes this timer from any that replaced it
  generation: u64,
  credential: Credential,
  timer: AbortHandle,
}

/// Pending debounce timers, at most one per entry.
#[derive(Default)]
pub(crate) struct DebounceRegistry {
  next_generation: AtomicU64,
  pending: Mutex<HashMap<EntryId, PendingPush>>,
}

impl DebounceRegistry {
  fn pending(&self) -> MutexGuard<'_, HashMap<EntryId, PendingPush>> {
    self.pending.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Claim the timer for `id` if it is still the current one.
  fn take(&self, id: &EntryId, generation: u64) -> bool {
    let mut pending = self.pending();
    match pending.get(id) {
      Some(p) if p.generation == generation => {
        pending.remove(id);
        true
      }
      _ => false,
    }
  }

  fn drain(&self) -> Vec<(EntryId, PendingPush)> {
    self.pending().drain().collect()
  }

  pub(crate) fn is_pending(&self, id: &EntryId) -> bool {
    self.pending().contains_key(id)
  }

  pub(crate) fn len(&self) -> usize {
    self.pending().len()
  }
}

impl<S: EntryStore, T: StateTransport> Shared<S, T> {
  /// Restart the debounce window for `id`.
  ///
  /// When the window elapses the entry's state as of that moment is pushed,
  /// not the state at scheduling time.
  pub(crate) fn schedule(self: &Arc<Self>, id: &EntryId, credential: &Credential) {
    let generation = self.debounce.next_generation.fetch_add(1, Ordering::Relaxed);
    let delay = self.options.debounce;

    // Hold the map while spawning so the timer can't fire before it is registered
    let mut pending = self.debounce.pending();

    let shared = Arc::clone(self);
    let task_id = id.clone();
    let task_credential = credential.clone();
    let timer = tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      if !shared.debounce.take(&task_id, generation) {
        return;
      }
      shared
        .push_latest(&task_id, &task_credential, PushOptions::default())
        .await;
    });

    let previous = pending.insert(
      id.clone(),
      PendingPush {
        generation,
        credential: credential.clone(),
        timer: timer.abort_handle(),
      },
    );
    if let Some(previous) = previous {
      previous.timer.abort();
    }
    debug!(entry = %id, delay_ms = delay.as_millis() as u64, "Push scheduled");
  }

  /// Cancel every pending timer and push those entries now with keepalive.
  ///
  /// Entries that are no longer dirty are skipped.
  pub(crate) async fn flush_all(&self) -> Vec<(EntryId, PushOutcome)> {
    let pending = self.debounce.drain();
    if pending.is_empty() {
      return Vec::new();
    }
    info!(count = pending.len(), "Flushing pending pushes");

    let pushes = pending.into_iter().map(|(id, p)| async move {
      p.timer.abort();
      let outcome = self
        .push_latest(&id, &p.credential, PushOptions::keepalive())
        .await;
      (id, outcome)
    });

    join_all(pushes).await
  }
}
