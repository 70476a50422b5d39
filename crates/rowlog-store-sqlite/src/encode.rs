//! Encoding and decoding helpers between rowlog domain types and the plain
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings with a fixed microsecond width,
//! so lexical order in SQL matches chronological order. Change sets and
//! property fingerprints are stored as compact JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use rowlog_core::{
  change::ChangeSet,
  entry::ChangeLogEntry,
  fingerprint::Fingerprint,
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Field names ─────────────────────────────────────────────────────────────

pub fn encode_field_names(names: &[String]) -> String { names.join(",") }

pub fn decode_field_names(s: &str) -> Vec<String> {
  s.split(',').filter(|n| !n.is_empty()).map(str::to_owned).collect()
}

// ─── Blobs ───────────────────────────────────────────────────────────────────

pub fn encode_change_set(set: &ChangeSet) -> Result<String> {
  Ok(serde_json::to_string(set)?)
}

pub fn decode_change_set(s: &str) -> Result<ChangeSet> { Ok(serde_json::from_str(s)?) }

pub fn encode_property_fingerprints(fps: &BTreeMap<String, Fingerprint>) -> Result<String> {
  Ok(serde_json::to_string(fps)?)
}

pub fn decode_property_fingerprints(s: &str) -> Result<BTreeMap<String, Fingerprint>> {
  Ok(serde_json::from_str(s)?)
}

// ─── Row type ────────────────────────────────────────────────────────────────

/// Column list matching [`RawEntry::from_row`].
pub const ENTRY_COLUMNS: &str = "entry_id, namespace, record_type, record_id, field_names, \
                                 change_set, fingerprint, property_fingerprints, created_at, \
                                 notified";

/// Raw values read directly from a `change_log` row.
pub struct RawEntry {
  pub entry_id:              i64,
  pub namespace:             String,
  pub record_type:           String,
  pub record_id:             i64,
  pub field_names:           String,
  pub change_set:            String,
  pub fingerprint:           String,
  pub property_fingerprints: String,
  pub created_at:            String,
  pub notified:              bool,
}

impl RawEntry {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      entry_id:              row.get(0)?,
      namespace:             row.get(1)?,
      record_type:           row.get(2)?,
      record_id:             row.get(3)?,
      field_names:           row.get(4)?,
      change_set:            row.get(5)?,
      fingerprint:           row.get(6)?,
      property_fingerprints: row.get(7)?,
      created_at:            row.get(8)?,
      notified:              row.get(9)?,
    })
  }

  pub fn into_entry(self) -> Result<ChangeLogEntry> {
    Ok(ChangeLogEntry {
      entry_id:              self.entry_id,
      namespace:             self.namespace,
      record_type:           self.record_type,
      record_id:             self.record_id,
      field_names:           decode_field_names(&self.field_names),
      change_set:            decode_change_set(&self.change_set)?,
      fingerprint:           Fingerprint::from_hex(self.fingerprint),
      property_fingerprints: decode_property_fingerprints(&self.property_fingerprints)?,
      created_at:            decode_dt(&self.created_at)?,
      notified:              self.notified,
    })
  }
}
