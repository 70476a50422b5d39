//! Change sets — the diff between two observations of one record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

// ─── Record identity ─────────────────────────────────────────────────────────

/// Identifies one monitored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
  pub namespace:   String,
  pub record_type: String,
  pub record_id:   i64,
}

impl RecordKey {
  pub fn new(
    namespace: impl Into<String>,
    record_type: impl Into<String>,
    record_id: i64,
  ) -> Self {
    Self {
      namespace: namespace.into(),
      record_type: record_type.into(),
      record_id,
    }
  }
}

// ─── Monitored fields ────────────────────────────────────────────────────────

/// Whether a monitored field is a stored column or computed from the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
  #[default]
  Stored,
  /// Computed from the record; deduplicated against the last time this
  /// property was logged rather than against the preceding entry.
  Derived,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
  pub name: String,
  pub kind: FieldKind,
}

impl FieldSpec {
  pub fn stored(name: impl Into<String>) -> Self {
    Self { name: name.into(), kind: FieldKind::Stored }
  }

  pub fn derived(name: impl Into<String>) -> Self {
    Self { name: name.into(), kind: FieldKind::Derived }
  }
}

/// The ordered list of fields monitored on a record type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitoredFields(Vec<FieldSpec>);

impl MonitoredFields {
  pub fn new(fields: Vec<FieldSpec>) -> Self { Self(fields) }

  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.0.iter().map(|f| f.name.as_str())
  }

  pub fn is_derived(&self, name: &str) -> bool {
    self.0.iter().any(|f| f.name == name && f.kind == FieldKind::Derived)
  }

  pub fn derived(&self) -> impl Iterator<Item = &str> {
    self
      .0
      .iter()
      .filter(|f| f.kind == FieldKind::Derived)
      .map(|f| f.name.as_str())
  }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl FromIterator<FieldSpec> for MonitoredFields {
  fn from_iter<I: IntoIterator<Item = FieldSpec>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

// ─── Change ──────────────────────────────────────────────────────────────────

/// The old and new value of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
  pub old_value: Value,
  pub new_value: Value,
}

impl Change {
  pub fn new(old_value: impl Into<Value>, new_value: impl Into<Value>) -> Self {
    Self { old_value: old_value.into(), new_value: new_value.into() }
  }
}

// ─── ChangeSet ───────────────────────────────────────────────────────────────

/// Per-field changes observed by one write.
///
/// `created` marks the first-ever observation of the record, in which case
/// every old value is [`Value::Null`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
  pub changes: BTreeMap<String, Change>,
  pub created: bool,
}

impl ChangeSet {
  pub fn is_empty(&self) -> bool { self.changes.is_empty() }

  pub fn get(&self, field: &str) -> Option<&Change> { self.changes.get(field) }

  pub fn contains(&self, field: &str) -> bool { self.changes.contains_key(field) }

  /// New values keyed by field name, in lexicographic key order.
  pub fn new_values(&self) -> BTreeMap<String, Value> {
    self
      .changes
      .iter()
      .map(|(k, c)| (k.clone(), c.new_value.clone()))
      .collect()
  }

  pub fn old_values(&self) -> BTreeMap<String, Value> {
    self
      .changes
      .iter()
      .map(|(k, c)| (k.clone(), c.old_value.clone()))
      .collect()
  }

  pub fn field_new_value(&self, field: &str) -> Option<&Value> {
    self.changes.get(field).map(|c| &c.new_value)
  }

  pub fn field_old_value(&self, field: &str) -> Option<&Value> {
    self.changes.get(field).map(|c| &c.old_value)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_values_are_sorted_by_field() {
    let set = ChangeSet {
      changes: BTreeMap::from([
        ("status".to_owned(), Change::new("pending", "completed")),
        ("driver_id".to_owned(), Change::new(Value::Null, 42_i64)),
      ]),
      created: false,
    };
    let keys: Vec<_> = set.new_values().into_keys().collect();
    assert_eq!(keys, ["driver_id", "status"]);
    assert_eq!(set.field_old_value("driver_id"), Some(&Value::Null));
    assert_eq!(set.field_new_value("missing"), None);
    assert_eq!(
      set.old_values(),
      BTreeMap::from([
        ("driver_id".to_owned(), Value::Null),
        ("status".to_owned(), Value::from("pending")),
      ]),
    );
  }

  #[test]
  fn derived_fields_are_reported() {
    let fields = MonitoredFields::new(vec![
      FieldSpec::stored("status"),
      FieldSpec::derived("eta_bucket"),
    ]);
    assert!(fields.is_derived("eta_bucket"));
    assert!(!fields.is_derived("status"));
    assert_eq!(fields.derived().collect::<Vec<_>>(), ["eta_bucket"]);
  }
}
