//! Synchronization between the local cache and the state server.
//!
//! - Debounced pushes of dirty entries, flushed on hide/unload
//! - Manifest-driven reconciliation that never overwrites local edits
//! - One-request hydration of an empty cache after login

mod bulk;
mod debounce;
mod listeners;
mod push;
mod reconcile;
mod service;
#[cfg(test)]
mod testing;

pub use crate::lifecycle::Lifecycle;
pub use bulk::LoginSync;
pub use listeners::Subscription;
pub use push::PushOutcome;
pub use reconcile::ReconcileOutcome;
pub use service::{EntryStatus, SyncOptions, SyncService};
