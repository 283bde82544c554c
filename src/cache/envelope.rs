//! On-disk record format for cache entries.
//!
//! Current builds persist a versioned envelope:
//!
//! ```json
//! { "v": 1, "state": ..., "lastModifiedAt": "...", "lastSyncedAt": "..." }
//! ```
//!
//! Older builds stored the bare feature payload. Those records are upgraded
//! on read as never-synced local data so they get pushed once.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::traits::{Entry, Timestamp};

/// Envelope version written by this build.
pub const ENVELOPE_VERSION: u32 = 1;

/// Version tag reported for upgraded bare payloads.
pub const LEGACY_VERSION: u32 = 0;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvelopeV1 {
  v: u32,
  state: Value,
  last_modified_at: Timestamp,
  last_synced_at: Timestamp,
}

/// Serialize an entry as the current envelope version.
pub fn encode(entry: &Entry) -> Result<Vec<u8>> {
  let envelope = EnvelopeV1 {
    v: ENVELOPE_VERSION,
    state: entry.state.clone(),
    last_modified_at: entry.last_modified_at.clone(),
    last_synced_at: entry.last_synced_at.clone(),
  };
  serde_json::to_vec(&envelope).map_err(|e| eyre!("Failed to serialize entry: {}", e))
}

/// Decode a persisted record, upgrading bare payloads.
pub fn decode(raw: &[u8]) -> Result<Entry> {
  let value: Value =
    serde_json::from_slice(raw).map_err(|e| eyre!("Failed to parse cache record: {}", e))?;

  match envelope_version(&value) {
    Some(1) => {
      let envelope: EnvelopeV1 =
        serde_json::from_value(value).map_err(|e| eyre!("Malformed v1 envelope: {}", e))?;
      Ok(Entry {
        state: envelope.state,
        last_modified_at: envelope.last_modified_at,
        last_synced_at: envelope.last_synced_at,
        version: envelope.v,
      })
    }
    Some(v) => Err(eyre!("Unsupported envelope version {}", v)),
    None => Ok(upgrade_legacy(value)),
  }
}

/// Detect an envelope by its full key set, so a legacy payload that happens
/// to contain a `v` field is still read as a payload.
fn envelope_version(value: &Value) -> Option<u64> {
  let obj = value.as_object()?;
  if !(obj.contains_key("state") && obj.contains_key("lastSyncedAt")) {
    return None;
  }
  obj.get("v").and_then(Value::as_u64)
}

fn upgrade_legacy(state: Value) -> Entry {
  Entry {
    state,
    last_modified_at: Timestamp::now(),
    last_synced_at: Timestamp::never(),
    version: LEGACY_VERSION,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_encode_writes_current_version() {
    let entry = Entry {
      state: json!({"level": 3}),
      last_modified_at: Timestamp::from("2026-01-01T00:00:01.000Z"),
      last_synced_at: Timestamp::never(),
      version: ENVELOPE_VERSION,
    };
    let raw = encode(&entry).unwrap();
    let value: Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(value["v"], json!(1));
    assert_eq!(value["lastModifiedAt"], json!("2026-01-01T00:00:01.000Z"));

    assert_eq!(decode(&raw).unwrap(), entry);
  }

  #[test]
  fn test_bare_payload_upgrades_as_dirty() {
    let entry = decode(br#"{"level": 3, "v": 9}"#).unwrap();
    assert_eq!(entry.state, json!({"level": 3, "v": 9}));
    assert_eq!(entry.version, LEGACY_VERSION);
    assert_eq!(entry.last_synced_at, Timestamp::never());
    assert!(entry.is_dirty());
  }

  #[test]
  fn test_bare_scalar_payload_upgrades() {
    let entry = decode(b"[1, 2, 3]").unwrap();
    assert_eq!(entry.state, json!([1, 2, 3]));
    assert!(entry.is_dirty());
  }

  #[test]
  fn test_unknown_envelope_version_is_error() {
    let raw = br#"{"v": 7, "state": {}, "lastModifiedAt": "a", "lastSyncedAt": "b"}"#;
    assert!(decode(raw).is_err());
  }

  #[test]
  fn test_garbage_is_error() {
    assert!(decode(b"not json").is_err());
  }
}
