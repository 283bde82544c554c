//! Serde types matching the state endpoint payloads.
//!
//! These are kept apart from the domain types so the wire shapes can
//! change without touching the sync engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use crate::cache::{EntryId, Timestamp};

use super::types::RemoteState;

// ============================================================================
// GET /state/{featureType}?key={subKey}
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiStateResponse {
  #[serde(default)]
  pub state: Value,
  pub updated_at: Timestamp,
}

// ============================================================================
// PUT /state/{featureType}?key={subKey}
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiPutRequest<'a> {
  pub state: &'a Value,
}

#[derive(Debug, Deserialize)]
pub struct ApiPutResponse {
  #[serde(default)]
  pub success: bool,
  pub updated_at: Timestamp,
}

// ============================================================================
// GET /state/meta and GET /state/all
// ============================================================================

/// `{ "{featureType}:{subKey}": updated_at, ... }`
pub type ApiManifest = HashMap<String, Timestamp>;

/// `{ "{featureType}:{subKey}": { state, updated_at }, ... }`
pub type ApiBulkResponse = HashMap<String, ApiStateResponse>;

// ============================================================================
// Conversions to domain types
// ============================================================================

impl From<ApiStateResponse> for RemoteState {
  fn from(resp: ApiStateResponse) -> Self {
    RemoteState {
      state: resp.state,
      updated_at: resp.updated_at,
    }
  }
}

/// Convert a manifest into entry ids, sorted for deterministic pull order.
/// Keys that are not `feature:key` are skipped.
pub fn manifest_entries(manifest: ApiManifest) -> Vec<(EntryId, Timestamp)> {
  let mut entries: Vec<_> = manifest
    .into_iter()
    .filter_map(|(key, ts)| parse_key(&key).map(|id| (id, ts)))
    .collect();
  entries.sort_by(|a, b| a.0.cmp(&b.0));
  entries
}

/// Convert a bulk payload into entry ids, sorted like the manifest.
pub fn bulk_entries(bulk: ApiBulkResponse) -> Vec<(EntryId, RemoteState)> {
  let mut entries: Vec<_> = bulk
    .into_iter()
    .filter_map(|(key, resp)| parse_key(&key).map(|id| (id, RemoteState::from(resp))))
    .collect();
  entries.sort_by(|a, b| a.0.cmp(&b.0));
  entries
}

fn parse_key(key: &str) -> Option<EntryId> {
  match key.parse() {
    Ok(id) => Some(id),
    Err(e) => {
      warn!(key, error = %e, "Skipping unrecognized entry key");
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_manifest_entries_parses_and_sorts() {
    let manifest: ApiManifest = serde_json::from_value(json!({
      "tank:main": "2026-01-01T00:00:02.000Z",
      "research:siege": "2026-01-01T00:00:01.000Z",
      "garbage": "2026-01-01T00:00:00.000Z",
    }))
    .unwrap();

    let entries = manifest_entries(manifest);
    assert_eq!(
      entries,
      vec![
        (
          EntryId::new("research", "siege"),
          Timestamp::from("2026-01-01T00:00:01.000Z")
        ),
        (
          EntryId::main("tank"),
          Timestamp::from("2026-01-01T00:00:02.000Z")
        ),
      ]
    );
  }

  #[test]
  fn test_bulk_entries() {
    let bulk: ApiBulkResponse = serde_json::from_value(json!({
      "tank:main": { "state": { "hp": 1 }, "updated_at": "2026-01-01T00:00:02.000Z" },
    }))
    .unwrap();

    let entries = bulk_entries(bulk);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, EntryId::main("tank"));
    assert_eq!(entries[0].1.state, json!({ "hp": 1 }));
  }

  #[test]
  fn test_put_request_shape() {
    let state = json!({ "hp": 1 });
    let body = serde_json::to_value(ApiPutRequest { state: &state }).unwrap();
    assert_eq!(body, json!({ "state": { "hp": 1 } }));
  }

  #[test]
  fn test_put_response_without_success_flag() {
    let resp: ApiPutResponse =
      serde_json::from_value(json!({ "updated_at": "2026-01-01T00:00:00.000Z" })).unwrap();
    assert!(!resp.success);
  }
}
