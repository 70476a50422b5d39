//! Deduplication and linkage: deciding whether a change set becomes an entry.

use std::collections::BTreeMap;

use crate::{
  Error, Result,
  change::{ChangeSet, MonitoredFields, RecordKey},
  entry::{ChangeLogEntry, NewEntry},
  fingerprint::{Fingerprint, entry_fingerprint, property_fingerprints},
  logger::ChangeLogger,
  store::{AppendOutcome, ChangeHistoryStore},
};

impl<S: ChangeHistoryStore> ChangeLogger<S> {
  /// Persist `change_set` for the record unless it repeats history.
  ///
  /// Changes to fields outside `fields` are dropped first.
  ///
  /// Returns `None` without writing when the set is empty, when an entry with
  /// the same fingerprint already exists, when its new values equal the
  /// record's baseline values, or when a concurrent writer won the race to
  /// append the same fingerprint.
  ///
  /// The new entry's predecessor is not stored; see
  /// [`ChangeLogger::previous_entry`].
  pub async fn record_change(
    &self,
    key: &RecordKey,
    fields: &MonitoredFields,
    mut change_set: ChangeSet,
  ) -> Result<Option<ChangeLogEntry>> {
    let before = change_set.changes.len();
    change_set.changes.retain(|name, _| fields.names().any(|f| f == name.as_str()));
    if change_set.changes.len() < before {
      tracing::debug!(
        namespace = %key.namespace,
        record_type = %key.record_type,
        record_id = key.record_id,
        dropped = before - change_set.changes.len(),
        "ignoring changes to unmonitored fields"
      );
    }
    if change_set.is_empty() {
      return Ok(None);
    }

    let field_names: Vec<String> = fields
      .names()
      .filter(|name| change_set.contains(name))
      .map(str::to_owned)
      .collect();
    let fingerprint = entry_fingerprint(key, &field_names, &change_set.new_values())?;
    let property_fingerprints = property_fingerprints(fields, &change_set)?;

    if self.store.fingerprint_exists(&fingerprint).await.map_err(Error::store)? {
      tracing::debug!(
        namespace = %key.namespace,
        record_type = %key.record_type,
        record_id = key.record_id,
        %fingerprint,
        "identical change already logged"
      );
      return Ok(None);
    }

    if self
      .repeats_baseline(key, &field_names, &property_fingerprints, &change_set)
      .await?
    {
      tracing::debug!(
        namespace = %key.namespace,
        record_type = %key.record_type,
        record_id = key.record_id,
        "change repeats logged values"
      );
      return Ok(None);
    }

    let new_entry = NewEntry {
      key: key.clone(),
      field_names,
      change_set,
      fingerprint,
      property_fingerprints,
      created_at: self.clock.now(),
    };

    match self.store.append(new_entry).await.map_err(Error::store)? {
      AppendOutcome::Appended(entry) => {
        tracing::debug!(
          namespace = %key.namespace,
          record_type = %key.record_type,
          record_id = key.record_id,
          entry_id = entry.entry_id,
          "change logged"
        );
        Ok(Some(entry))
      }
      AppendOutcome::DuplicateFingerprint => {
        tracing::warn!(
          namespace = %key.namespace,
          record_type = %key.record_type,
          record_id = key.record_id,
          "fingerprint conflict on append; change already logged by another writer"
        );
        Ok(None)
      }
    }
  }

  /// Whether every new value in `change_set` equals its baseline: the
  /// change's own old value for stored fields, and the value last logged for
  /// derived properties. A property never logged before has no baseline.
  async fn repeats_baseline(
    &self,
    key: &RecordKey,
    field_names: &[String],
    property_fingerprints: &BTreeMap<String, Fingerprint>,
    change_set: &ChangeSet,
  ) -> Result<bool> {
    let mut baseline = BTreeMap::new();
    for field in field_names {
      let Some(change) = change_set.get(field) else {
        continue;
      };
      let value = if property_fingerprints.contains_key(field) {
        let last = self.last_recording(key, field, None).await?;
        match last.and_then(|e| e.change_set.field_new_value(field).cloned()) {
          Some(value) => value,
          None => return Ok(false),
        }
      } else {
        change.old_value.clone()
      };
      baseline.insert(field.clone(), value);
    }
    Ok(baseline == change_set.new_values())
  }
}
