use serde_json::Value;
use std::fmt;

use crate::cache::Timestamp;

/// Bearer credential supplied by the external auth subsystem.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
  pub fn new(token: impl Into<String>) -> Self {
    Self(token.into())
  }

  pub fn token(&self) -> &str {
    &self.0
  }
}

impl fmt::Debug for Credential {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("Credential(***)")
  }
}

/// Snapshot of one entry as stored on the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteState {
  pub state: Value,
  pub updated_at: Timestamp,
}

/// Per-request options for a push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushOptions {
  /// Issued from a hide/unload flush; must run to completion even though
  /// the host is going away.
  pub keepalive: bool,
}

impl PushOptions {
  pub fn keepalive() -> Self {
    Self { keepalive: true }
  }
}
