//! First-login bulk sync.

use tracing::{debug, info, warn};

use crate::cache::EntryStore;
use crate::remote::{Credential, StateTransport};

use super::reconcile::ReconcileOutcome;
use super::service::Shared;

/// What `on_login` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginSync {
  /// Empty cache hydrated from `GET /state/all`
  Hydrated { entries: usize },
  /// Cache already had data; an immediate reconciliation ran instead
  Reconciled(ReconcileOutcome),
  /// The bulk fetch failed; the next reconciliation will catch up
  Failed,
}

impl<S: EntryStore, T: StateTransport> Shared<S, T> {
  pub(crate) async fn on_login(&self, credential: &Credential) -> LoginSync {
    if !self.store.is_empty() {
      // Returning device: a full-state stomp could lose local edits
      debug!("Local cache populated; forcing reconciliation");
      self.reconcile.invalidate();
      return LoginSync::Reconciled(self.reconcile(credential).await);
    }

    info!("Empty local cache; hydrating from server");
    match self.transport.fetch_all(credential).await {
      Ok(remote) => {
        let mut entries = 0;
        for (id, state) in remote {
          if self.absorb(&id, state) {
            entries += 1;
          }
        }
        self.reconcile.mark_checked();
        info!(entries, "Hydrated local cache");
        LoginSync::Hydrated { entries }
      }
      Err(e) => {
        warn!(error = %e, "Bulk fetch failed");
        LoginSync::Failed
      }
    }
  }
}
