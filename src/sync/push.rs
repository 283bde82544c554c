//! Push pipeline: send a dirty snapshot, absorb the server's timestamp.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::cache::{EntryId, EntryStore, Timestamp};
use crate::remote::{Credential, PushOptions, StateTransport};

use super::service::Shared;

/// Result of one push attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
  /// Server acknowledged; the entry is clean as of this server time
  Synced(Timestamp),
  /// Nothing to send: the entry is missing or already clean
  Skipped,
  /// Server acknowledged, but the entry was edited while the request was in
  /// flight, so it stays dirty for the next push
  Superseded(Timestamp),
  /// Request failed or was rejected; the entry stays dirty
  Failed,
}

/// One async mutex per entry, serializing pushes for that entry.
#[derive(Default)]
pub(crate) struct PushLocks {
  locks: Mutex<HashMap<EntryId, Arc<tokio::sync::Mutex<()>>>>,
}

impl PushLocks {
  fn lock_for(&self, id: &EntryId) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(locks.entry(id.clone()).or_default())
  }
}

impl<S: EntryStore, T: StateTransport> Shared<S, T> {
  /// Push an explicit snapshot of `id`.
  pub(crate) async fn push(
    &self,
    id: &EntryId,
    state: Value,
    credential: &Credential,
    options: PushOptions,
  ) -> PushOutcome {
    let lock = self.push_locks.lock_for(id);
    let _in_flight = lock.lock().await;
    self.send_push(id, state, credential, options).await
  }

  /// Push whatever `id` holds once the entry's previous push has finished,
  /// skipping entries with nothing unsynced.
  pub(crate) async fn push_latest(
    &self,
    id: &EntryId,
    credential: &Credential,
    options: PushOptions,
  ) -> PushOutcome {
    let lock = self.push_locks.lock_for(id);
    let _in_flight = lock.lock().await;

    match self.store.read(id) {
      Some(entry) if entry.is_dirty() => self.send_push(id, entry.state, credential, options).await,
      _ => {
        debug!(entry = %id, "Nothing to push");
        PushOutcome::Skipped
      }
    }
  }

  async fn send_push(
    &self,
    id: &EntryId,
    state: Value,
    credential: &Credential,
    options: PushOptions,
  ) -> PushOutcome {
    debug!(entry = %id, keepalive = options.keepalive, "Pushing entry");

    match self
      .transport
      .put_state(id, &state, credential, options)
      .await
    {
      Ok(updated_at) => match self.store.mark_synced(id, &state, updated_at.clone()) {
        Some(_) => {
          info!(entry = %id, updated_at = %updated_at, "Entry synced");
          PushOutcome::Synced(updated_at)
        }
        None => {
          debug!(entry = %id, "Entry changed during push; leaving dirty");
          PushOutcome::Superseded(updated_at)
        }
      },
      Err(e) if e.is_rejection() => {
        warn!(entry = %id, error = %e, "Server rejected push; entry stays dirty");
        PushOutcome::Failed
      }
      Err(e) => {
        debug!(entry = %id, error = %e, "Push failed; will retry on next cadence");
        PushOutcome::Failed
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::Touch;
  use crate::sync::testing::{credential, FakeTransport};
  use crate::sync::SyncService;
  use serde_json::json;

  #[tokio::test]
  async fn test_push_marks_synced_with_server_time() {
    let transport = FakeTransport::new();
    let service = SyncService::for_tests(transport.clone());
    let id = EntryId::main("tank");
    service.shared.store.write(&id, json!({"hp": 1}), Touch::Local);

    let outcome = service
      .push(&id, json!({"hp": 1}), &credential(), PushOptions::default())
      .await;

    let server_ts = transport.server_timestamp(&id).unwrap();
    assert_eq!(outcome, PushOutcome::Synced(server_ts.clone()));
    let entry = service.entry(&id).unwrap();
    assert_eq!(entry.last_synced_at, server_ts);
    assert!(entry.is_clean());
  }

  #[tokio::test]
  async fn test_push_with_server_clock_behind_leaves_entry_clean() {
    let transport = FakeTransport::new();
    let server_now = Timestamp::from("2000-01-01T00:00:00.000Z");
    transport.set_server_clock(server_now.clone());
    let service = SyncService::for_tests(transport.clone());
    let id = EntryId::main("tank");
    service.shared.store.write(&id, json!({"hp": 1}), Touch::Local);

    let outcome = service
      .push(&id, json!({"hp": 1}), &credential(), PushOptions::default())
      .await;

    assert_eq!(outcome, PushOutcome::Synced(server_now.clone()));
    let entry = service.entry(&id).unwrap();
    assert!(entry.is_clean());
    assert_eq!(entry.last_synced_at, server_now);
  }

  #[tokio::test]
  async fn test_failed_push_leaves_entry_dirty() {
    let transport = FakeTransport::new();
    transport.fail_pushes(true);
    let service = SyncService::for_tests(transport.clone());
    let id = EntryId::main("tank");
    service.shared.store.write(&id, json!(1), Touch::Local);

    let outcome = service
      .push(&id, json!(1), &credential(), PushOptions::default())
      .await;

    assert_eq!(outcome, PushOutcome::Failed);
    assert!(service.entry(&id).unwrap().is_dirty());
  }

  #[tokio::test]
  async fn test_stale_snapshot_push_is_superseded() {
    let transport = FakeTransport::new();
    let service = SyncService::for_tests(transport.clone());
    let id = EntryId::main("tank");
    service.shared.store.write(&id, json!(2), Touch::Local);

    let outcome = service
      .push(&id, json!(1), &credential(), PushOptions::default())
      .await;

    assert!(matches!(outcome, PushOutcome::Superseded(_)));
    assert!(service.entry(&id).unwrap().is_dirty());
  }

  #[tokio::test]
  async fn test_push_latest_skips_clean_entry() {
    let transport = FakeTransport::new();
    let service = SyncService::for_tests(transport.clone());
    let id = EntryId::main("tank");
    service.shared.store.write(
      &id,
      json!(1),
      Touch::Synced(Timestamp::from("2026-01-01T00:00:00.000Z")),
    );

    let outcome = service
      .shared
      .push_latest(&id, &credential(), PushOptions::default())
      .await;

    assert_eq!(outcome, PushOutcome::Skipped);
    assert!(transport.pushes().is_empty());
  }
}
