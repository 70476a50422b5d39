//! Notifiability: which fields of a logged entry represent genuine change.

use std::{
  collections::{BTreeMap, BTreeSet},
  panic::{self, AssertUnwindSafe},
};

use crate::{
  Error, Result,
  entry::ChangeLogEntry,
  logger::ChangeLogger,
  store::ChangeHistoryStore,
  value::Value,
};

impl<S: ChangeHistoryStore> ChangeLogger<S> {
  /// The fields of `entry` worth notifying about.
  ///
  /// - A first observation is never notifiable.
  /// - A derived property is notifiable unless the latest earlier entry that
  ///   recorded it carries the same property fingerprint. That entry may sit
  ///   many versions back.
  /// - A stored field is notifiable unless the previous entry recorded the
  ///   exact same old/new pair for it. No previous entry means notifiable.
  /// - Fields whose new value is null are dropped. This is a policy choice.
  pub async fn notifiable_fields(&self, entry: &ChangeLogEntry) -> Result<BTreeSet<String>> {
    let mut fields = BTreeSet::new();
    if entry.change_set.created {
      return Ok(fields);
    }

    let key = entry.key();
    let previous = self.previous_entry(entry).await?;

    for field in &entry.field_names {
      let notifiable = match entry.property_fingerprints.get(field) {
        Some(current) => {
          let baseline = self.last_recording(&key, field, Some(entry.created_at)).await?;
          baseline.as_ref().and_then(|e| e.property_fingerprints.get(field)) != Some(current)
        }
        None => match &previous {
          None => true,
          Some(prev) => prev.change_set.get(field) != entry.change_set.get(field),
        },
      };
      if notifiable {
        fields.insert(field.clone());
      }
    }

    fields.retain(|f| {
      entry
        .change_set
        .field_new_value(f)
        .is_some_and(|v| !v.is_null())
    });
    Ok(fields)
  }

  /// Resolve the notifiable fields of a freshly appended entry and hand them
  /// to the record type's callback, then mark the entry notified.
  ///
  /// Returns the fields delivered; empty when nothing was delivered. Callback
  /// errors and panics are logged and not retried.
  pub async fn notify(&self, entry: &ChangeLogEntry) -> Result<BTreeSet<String>> {
    if entry.notified {
      return Ok(BTreeSet::new());
    }

    let fields = self.notifiable_fields(entry).await?;
    if fields.is_empty() {
      return Ok(fields);
    }

    let Some(callback) = self
      .registry
      .get(&entry.record_type)
      .and_then(|r| r.callback.clone())
    else {
      tracing::debug!(
        record_type = %entry.record_type,
        entry_id = entry.entry_id,
        "no notification callback registered"
      );
      return Ok(BTreeSet::new());
    };

    match panic::catch_unwind(AssertUnwindSafe(|| callback.notify(entry, &fields))) {
      Ok(Ok(())) => {}
      Ok(Err(e)) => tracing::error!(
        namespace = %entry.namespace,
        record_type = %entry.record_type,
        record_id = entry.record_id,
        entry_id = entry.entry_id,
        error = %e,
        "notification callback failed"
      ),
      Err(_) => tracing::error!(
        namespace = %entry.namespace,
        record_type = %entry.record_type,
        record_id = entry.record_id,
        entry_id = entry.entry_id,
        "notification callback panicked"
      ),
    }

    if !self.store.mark_notified(entry.entry_id).await.map_err(Error::store)? {
      tracing::debug!(entry_id = entry.entry_id, "entry was already marked notified");
    }
    Ok(fields)
  }

  /// Reconstruct the record's values just before `entry`.
  ///
  /// Stored fields use the entry's own old values. A derived property uses
  /// the value last logged for it, falling back to the old value the host
  /// observed when the property was never logged before.
  pub async fn old_values_as_of(&self, entry: &ChangeLogEntry) -> Result<BTreeMap<String, Value>> {
    let key = entry.key();
    let mut values = BTreeMap::new();

    for field in &entry.field_names {
      let Some(change) = entry.change_set.get(field) else {
        continue;
      };
      let value = if entry.property_fingerprints.contains_key(field) {
        self
          .last_recording(&key, field, Some(entry.created_at))
          .await?
          .and_then(|e| e.change_set.field_new_value(field).cloned())
          .unwrap_or_else(|| change.old_value.clone())
      } else {
        change.old_value.clone()
      };
      values.insert(field.clone(), value);
    }
    Ok(values)
  }
}
