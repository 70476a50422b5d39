//! Snapshot diffing: two observations of a record → a [`ChangeSet`].

use std::collections::BTreeMap;

use crate::{
  change::{Change, ChangeSet, MonitoredFields},
  value::{Snapshot, Value},
};

/// Compare `old` and `new` over the monitored fields.
///
/// - No prior snapshot: every monitored field present on `new` is recorded
///   against [`Value::Null`] and the set is marked `created`.
/// - Otherwise only fields whose values differ (structurally) are recorded.
/// - No new snapshot: nothing is recorded; deletes are not logged.
///
/// Derived properties are compared exactly like stored fields; their separate
/// treatment happens when the set is fingerprinted and resolved.
pub fn diff(
  old: Option<&Snapshot>,
  new: Option<&Snapshot>,
  monitored: &MonitoredFields,
) -> ChangeSet {
  let Some(new) = new else {
    return ChangeSet::default();
  };

  let Some(old) = old else {
    let changes = monitored
      .names()
      .filter_map(|name| {
        new
          .get(name)
          .map(|v| (name.to_owned(), Change { old_value: Value::Null, new_value: v.clone() }))
      })
      .collect();
    return ChangeSet { changes, created: true };
  };

  let changes: BTreeMap<String, Change> = monitored
    .names()
    .filter_map(|name| {
      let (before, after) = (old.value(name), new.value(name));
      (before != after).then(|| {
        (name.to_owned(), Change { old_value: before.clone(), new_value: after.clone() })
      })
    })
    .collect();

  ChangeSet { changes, created: false }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::change::FieldSpec;

  fn trip_fields() -> MonitoredFields {
    MonitoredFields::new(vec![
      FieldSpec::stored("status"),
      FieldSpec::stored("driver_id"),
      FieldSpec::derived("eta_bucket"),
    ])
  }

  #[test]
  fn first_observation_records_every_present_field() {
    let new = Snapshot::new()
      .with("status", "pending")
      .with("driver_id", Value::Null)
      .with("unmonitored", 1_i64);

    let set = diff(None, Some(&new), &trip_fields());

    assert!(set.created);
    assert_eq!(set.changes.len(), 2);
    assert_eq!(set.get("status"), Some(&Change::new(Value::Null, "pending")));
    assert_eq!(set.get("driver_id"), Some(&Change::new(Value::Null, Value::Null)));
    assert!(!set.contains("eta_bucket"));
  }

  #[test]
  fn only_differing_fields_are_recorded() {
    let old = Snapshot::new().with("status", "pending").with("driver_id", Value::Null);
    let new = Snapshot::new().with("status", "pending").with("driver_id", 42_i64);

    let set = diff(Some(&old), Some(&new), &trip_fields());

    assert!(!set.created);
    assert_eq!(set.changes.len(), 1);
    assert_eq!(set.get("driver_id"), Some(&Change::new(Value::Null, 42_i64)));
  }

  #[test]
  fn identical_snapshots_produce_nothing() {
    let snap = Snapshot::new().with("status", "pending").with("eta_bucket", "5m");
    assert!(diff(Some(&snap), Some(&snap.clone()), &trip_fields()).is_empty());
  }

  #[test]
  fn derived_properties_diff_like_stored_fields() {
    let old = Snapshot::new().with("eta_bucket", "5m");
    let new = Snapshot::new().with("eta_bucket", "10m");
    let set = diff(Some(&old), Some(&new), &trip_fields());
    assert_eq!(set.get("eta_bucket"), Some(&Change::new("5m", "10m")));
  }

  #[test]
  fn composite_values_use_deep_equality() {
    let stops = || Value::from(vec!["a", "b"]);
    let old = Snapshot::new().with("status", stops());
    let new = Snapshot::new().with("status", stops());
    assert!(diff(Some(&old), Some(&new), &trip_fields()).is_empty());
  }

  #[test]
  fn missing_snapshots_produce_nothing() {
    let old = Snapshot::new().with("status", "pending");
    assert!(diff(None, None, &trip_fields()).is_empty());
    assert!(diff(Some(&old), None, &trip_fields()).is_empty());
  }
}
