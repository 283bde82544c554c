//! Core types for the synchronization cache.

use std::fmt;
use std::str::FromStr;

use chrono::{SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Report};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sub-key used when a feature keeps a single instance of state.
pub const DEFAULT_SUB_KEY: &str = "main";

/// Identity of a synchronized entry: `(feature type, sub-key)`.
///
/// The wire form is `"{feature}:{sub_key}"`, as used by the manifest and
/// bulk endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId {
  feature: String,
  sub_key: String,
}

impl EntryId {
  pub fn new(feature: impl Into<String>, sub_key: impl Into<String>) -> Self {
    Self {
      feature: feature.into(),
      sub_key: sub_key.into(),
    }
  }

  /// Entry for a feature with only one instance of state.
  pub fn main(feature: impl Into<String>) -> Self {
    Self::new(feature, DEFAULT_SUB_KEY)
  }

  pub fn feature(&self) -> &str {
    &self.feature
  }

  pub fn sub_key(&self) -> &str {
    &self.sub_key
  }
}

impl fmt::Display for EntryId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.feature, self.sub_key)
  }
}

impl FromStr for EntryId {
  type Err = Report;

  /// Parse the wire form. Only the first `:` separates feature from sub-key,
  /// so sub-keys may themselves contain colons.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.split_once(':') {
      Some((feature, sub_key)) if !feature.is_empty() && !sub_key.is_empty() => {
        Ok(Self::new(feature, sub_key))
      }
      _ => Err(eyre!("Invalid entry id '{}': expected 'feature:key'", s)),
    }
  }
}

/// Opaque, totally ordered timestamp.
///
/// Server timestamps are never parsed; ordering is plain string comparison,
/// which agrees with chronological order for the ISO 8601 values both sides
/// produce.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
  const NEVER: &'static str = "1970-01-01T00:00:00.000Z";

  /// Sentinel for "never synced"; sorts before every real timestamp.
  pub fn never() -> Self {
    Self(Self::NEVER.to_string())
  }

  /// Current local wall-clock time.
  pub fn now() -> Self {
    Self(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
  }

  /// A local modification stamp guaranteed to sort after `synced`.
  ///
  /// When the server clock runs ahead of ours, `now()` can be older than the
  /// last acknowledged server time. Appending to the synced value yields the
  /// smallest string that still compares greater.
  pub fn now_after(synced: &Timestamp) -> Self {
    let now = Self::now();
    if now > *synced {
      now
    } else {
      Self(format!("{}+", synced.0))
    }
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Timestamp {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<String> for Timestamp {
  fn from(s: String) -> Self {
    Self(s)
  }
}

impl From<&str> for Timestamp {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

/// One synchronized state record.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
  /// Feature-owned payload; never inspected here
  pub state: Value,
  /// Most recent local write
  pub last_modified_at: Timestamp,
  /// Most recent server acknowledgment
  pub last_synced_at: Timestamp,
  /// Envelope format this entry was decoded from
  pub version: u32,
}

impl Entry {
  /// True when the entry carries local modifications the server hasn't seen.
  pub fn is_dirty(&self) -> bool {
    self.last_modified_at > self.last_synced_at
  }

  pub fn is_clean(&self) -> bool {
    !self.is_dirty()
  }
}

/// How a cache write stamps the entry's timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Touch {
  /// A local edit: bumps `last_modified_at`, leaving the entry dirty.
  Local,
  /// Server-confirmed data: advances `last_synced_at` to the given server
  /// time and leaves `last_modified_at` alone.
  Synced(Timestamp),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_entry_id_wire_form() {
    let id = EntryId::new("research", "siege");
    assert_eq!(id.to_string(), "research:siege");
    assert_eq!("research:siege".parse::<EntryId>().unwrap(), id);
  }

  #[test]
  fn test_entry_id_keeps_colons_in_sub_key() {
    let id: EntryId = "tank:a:b".parse().unwrap();
    assert_eq!(id.feature(), "tank");
    assert_eq!(id.sub_key(), "a:b");
  }

  #[test]
  fn test_entry_id_rejects_malformed() {
    assert!("tank".parse::<EntryId>().is_err());
    assert!(":main".parse::<EntryId>().is_err());
    assert!("tank:".parse::<EntryId>().is_err());
  }

  #[test]
  fn test_never_sorts_first() {
    assert!(Timestamp::never() < Timestamp::now());
    assert!(Timestamp::never() < Timestamp::from("2000-01-01T00:00:00.000Z"));
  }

  #[test]
  fn test_now_after_server_clock_ahead() {
    let synced = Timestamp::from("2999-01-01T00:00:00.000Z");
    let stamp = Timestamp::now_after(&synced);
    assert!(stamp > synced);
  }

  #[test]
  fn test_dirty_and_clean() {
    let entry = Entry {
      state: Value::Null,
      last_modified_at: Timestamp::from("2026-01-01T00:01:40.000Z"),
      last_synced_at: Timestamp::from("2026-01-01T00:00:50.000Z"),
      version: 1,
    };
    assert!(entry.is_dirty());

    let synced = Entry {
      last_synced_at: entry.last_modified_at.clone(),
      ..entry
    };
    assert!(synced.is_clean());
  }
}
