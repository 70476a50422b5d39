//! Change log entries — the persisted rows of the change history.
//!
//! An entry is immutable once appended, apart from its `notified` flag. Its
//! predecessor is never stored; it is looked up by query every time, so a
//! late-arriving entry always links correctly against what already exists.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  change::{ChangeSet, RecordKey},
  fingerprint::Fingerprint,
  value::Value,
};

// ─── ChangeLogEntry ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
  /// Store-assigned surrogate id.
  pub entry_id:              i64,
  pub namespace:             String,
  pub record_type:           String,
  pub record_id:             i64,
  /// Monitored fields included in this entry, in configuration order.
  pub field_names:           Vec<String>,
  pub change_set:            ChangeSet,
  pub fingerprint:           Fingerprint,
  /// Derived property name → hash of that property's new value alone.
  pub property_fingerprints: BTreeMap<String, Fingerprint>,
  pub created_at:            DateTime<Utc>,
  pub notified:              bool,
}

impl ChangeLogEntry {
  pub fn key(&self) -> RecordKey {
    RecordKey::new(&self.namespace, &self.record_type, self.record_id)
  }

  pub fn records_field(&self, field: &str) -> bool {
    self.field_names.iter().any(|f| f == field)
  }

  pub fn new_values(&self) -> BTreeMap<String, Value> { self.change_set.new_values() }

  /// Ordering key within one record's history.
  pub fn position(&self) -> (DateTime<Utc>, i64) { (self.created_at, self.entry_id) }
}

// ─── NewEntry ────────────────────────────────────────────────────────────────

/// Input to [`crate::store::ChangeHistoryStore::append`]. The store assigns
/// `entry_id`; `notified` always starts out false.
#[derive(Debug, Clone)]
pub struct NewEntry {
  pub key:                   RecordKey,
  pub field_names:           Vec<String>,
  pub change_set:            ChangeSet,
  pub fingerprint:           Fingerprint,
  pub property_fingerprints: BTreeMap<String, Fingerprint>,
  pub created_at:            DateTime<Utc>,
}

impl NewEntry {
  pub fn into_entry(self, entry_id: i64) -> ChangeLogEntry {
    ChangeLogEntry {
      entry_id,
      namespace: self.key.namespace,
      record_type: self.key.record_type,
      record_id: self.key.record_id,
      field_names: self.field_names,
      change_set: self.change_set,
      fingerprint: self.fingerprint,
      property_fingerprints: self.property_fingerprints,
      created_at: self.created_at,
      notified: false,
    }
  }
}

// ─── Query type ──────────────────────────────────────────────────────────────

/// Parameters for [`crate::store::ChangeHistoryStore::list_entries`].
/// Results are newest first.
#[derive(Debug, Clone, Default)]
pub struct EntryQuery {
  pub namespace:   Option<String>,
  pub record_type: Option<String>,
  pub record_id:   Option<i64>,
  pub limit:       Option<usize>,
  pub offset:      Option<usize>,
}

impl EntryQuery {
  pub fn matches(&self, entry: &ChangeLogEntry) -> bool {
    self.namespace.as_ref().is_none_or(|ns| *ns == entry.namespace)
      && self.record_type.as_ref().is_none_or(|rt| *rt == entry.record_type)
      && self.record_id.is_none_or(|id| id == entry.record_id)
  }
}
