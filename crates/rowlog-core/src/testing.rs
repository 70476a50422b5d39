//! Shared fixtures for unit tests.

use std::{
  collections::{BTreeMap, BTreeSet},
  sync::{Arc, Mutex},
};

use chrono::{DateTime, TimeZone, Utc};

use crate::{
  change::{Change, ChangeSet, FieldSpec, MonitoredFields, RecordKey},
  entry::{ChangeLogEntry, NewEntry},
  fingerprint::{entry_fingerprint, property_fingerprints},
  memory::MemoryStore,
  registry::{CallbackError, NotifyCallback},
  store::{AppendOutcome, ChangeHistoryStore},
  value::Value,
};

pub fn trip_key() -> RecordKey { RecordKey::new("rides", "trip", 7) }

pub fn trip_fields() -> MonitoredFields {
  MonitoredFields::new(vec![
    FieldSpec::stored("status"),
    FieldSpec::stored("driver_id"),
    FieldSpec::derived("eta_bucket"),
  ])
}

pub fn at(secs: i64) -> DateTime<Utc> { Utc.timestamp_opt(secs, 0).unwrap() }

pub fn change_set(changes: &[(&str, Value, Value)], created: bool) -> ChangeSet {
  ChangeSet {
    changes: changes
      .iter()
      .map(|(name, old, new)| ((*name).to_owned(), Change::new(old.clone(), new.clone())))
      .collect(),
    created,
  }
}

/// Append an entry with a chosen timestamp, bypassing deduplication.
pub async fn append_at(
  store: &MemoryStore,
  key: &RecordKey,
  changes: &[(&str, Value, Value)],
  secs: i64,
) -> ChangeLogEntry {
  let fields = trip_fields();
  let set = change_set(changes, false);
  let field_names: Vec<String> =
    fields.names().filter(|n| set.contains(n)).map(str::to_owned).collect();
  let entry = NewEntry {
    key: key.clone(),
    fingerprint: entry_fingerprint(key, &field_names, &set.new_values()).unwrap(),
    property_fingerprints: property_fingerprints(&fields, &set).unwrap(),
    field_names,
    change_set: set,
    created_at: at(secs),
  };
  match store.append(entry).await.unwrap() {
    AppendOutcome::Appended(e) => e,
    AppendOutcome::DuplicateFingerprint => panic!("unexpected duplicate"),
  }
}

/// A notification callback that remembers what it was called with.
#[derive(Clone, Default)]
pub struct Recorder {
  calls: Arc<Mutex<Vec<(i64, Vec<String>)>>>,
}

impl Recorder {
  pub fn callback(&self) -> Arc<dyn NotifyCallback> {
    let calls = self.calls.clone();
    Arc::new(move |entry: &ChangeLogEntry, fields: &BTreeSet<String>| -> Result<(), CallbackError> {
      calls
        .lock()
        .unwrap()
        .push((entry.entry_id, fields.iter().cloned().collect()));
      Ok(())
    })
  }

  pub fn calls(&self) -> Vec<(i64, Vec<String>)> { self.calls.lock().unwrap().clone() }
}

pub fn values(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
  pairs.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect()
}
