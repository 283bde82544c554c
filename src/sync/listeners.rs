//! Per-entry change listeners.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::cache::EntryId;

type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Callbacks to run when an entry is overwritten by server data.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
  next_token: AtomicU64,
  listeners: Mutex<HashMap<EntryId, Vec<(u64, Callback)>>>,
}

impl ListenerRegistry {
  fn listeners(&self) -> MutexGuard<'_, HashMap<EntryId, Vec<(u64, Callback)>>> {
    self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub(crate) fn register(self: &Arc<Self>, id: &EntryId, callback: Callback) -> Subscription {
    let token = self.next_token.fetch_add(1, Ordering::Relaxed);
    self
      .listeners()
      .entry(id.clone())
      .or_default()
      .push((token, callback));

    Subscription {
      registry: Arc::downgrade(self),
      id: id.clone(),
      token,
    }
  }

  fn unregister(&self, id: &EntryId, token: u64) {
    let mut listeners = self.listeners();
    if let Some(list) = listeners.get_mut(id) {
      list.retain(|(t, _)| *t != token);
      if list.is_empty() {
        listeners.remove(id);
      }
    }
  }

  /// Run every callback registered for `id`, synchronously, in
  /// registration order.
  pub(crate) fn notify(&self, id: &EntryId, state: &Value) {
    // Callbacks run outside the lock so they may subscribe or unsubscribe
    let callbacks: Vec<Callback> = match self.listeners().get(id) {
      Some(list) => list.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
      None => return,
    };

    for callback in callbacks {
      callback(state);
    }
  }

  #[cfg(test)]
  pub(crate) fn count(&self, id: &EntryId) -> usize {
    self.listeners().get(id).map_or(0, Vec::len)
  }
}

/// Keeps a listener registered; dropping it unregisters the callback.
#[must_use = "dropping a Subscription unregisters the listener"]
pub struct Subscription {
  registry: Weak<ListenerRegistry>,
  id: EntryId,
  token: u64,
}

impl Subscription {
  pub fn entry(&self) -> &EntryId {
    &self.id
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(registry) = self.registry.upgrade() {
      registry.unregister(&self.id, self.token);
    }
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("id", &self.id)
      .field("token", &self.token)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_notify_reaches_only_matching_entry() {
    let registry = Arc::new(ListenerRegistry::default());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    let _sub = registry.register(
      &EntryId::main("tank"),
      Arc::new(move |v: &Value| sink.lock().unwrap().push(v.clone())),
    );

    registry.notify(&EntryId::main("research"), &json!(1));
    registry.notify(&EntryId::main("tank"), &json!(2));

    assert_eq!(*seen.lock().unwrap(), vec![json!(2)]);
  }

  #[test]
  fn test_drop_unregisters() {
    let registry = Arc::new(ListenerRegistry::default());
    let id = EntryId::main("tank");

    let first = registry.register(&id, Arc::new(|_: &Value| {}));
    let second = registry.register(&id, Arc::new(|_: &Value| {}));
    assert_eq!(registry.count(&id), 2);

    drop(first);
    assert_eq!(registry.count(&id), 1);
    drop(second);
    assert_eq!(registry.count(&id), 0);
  }

  #[test]
  fn test_subscription_outlives_registry() {
    let registry = Arc::new(ListenerRegistry::default());
    let sub = registry.register(&EntryId::main("tank"), Arc::new(|_: &Value| {}));
    drop(registry);
    drop(sub);
  }
}
