//! Field values and record snapshots.
//!
//! [`Value`] is the serialization contract for everything the change log
//! persists: every monitored field must be expressible as one of its variants.
//! The encoding is by content only, so two equal values always produce the
//! same bytes regardless of process or host.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

// ─── Value ───────────────────────────────────────────────────────────────────

/// A single field value observed on a monitored record.
///
/// Equality is structural: lists and maps compare element by element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
  /// The null/absent marker.
  #[default]
  Null,
  Bool(bool),
  Integer(i64),
  Float(f64),
  Text(String),
  Timestamp(DateTime<Utc>),
  /// A pointer to another record; contributes its identity, never its
  /// contents.
  Reference {
    record_type: String,
    record_id:   i64,
  },
  List(Vec<Value>),
  Map(BTreeMap<String, Value>),
}

impl Value {
  pub fn reference(record_type: impl Into<String>, record_id: i64) -> Self {
    Self::Reference { record_type: record_type.into(), record_id }
  }

  pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

  /// The content-stable string form used for fingerprinting.
  ///
  /// Fails for values with no stable encoding (non-finite floats), which
  /// JSON would otherwise silently turn into `null`.
  pub fn canonical(&self) -> Result<String> {
    self.check_encodable()?;
    Ok(serde_json::to_string(self)?)
  }

  fn check_encodable(&self) -> Result<()> {
    match self {
      Self::Float(f) if !f.is_finite() => {
        Err(Error::Unserializable(format!("non-finite float {f}")))
      }
      Self::List(items) => items.iter().try_for_each(Self::check_encodable),
      Self::Map(map) => map.values().try_for_each(Self::check_encodable),
      _ => Ok(()),
    }
  }

  /// Convert plain JSON into a value. Integral numbers become
  /// [`Value::Integer`]; everything else numeric becomes [`Value::Float`].
  pub fn from_json(json: serde_json::Value) -> Self {
    use serde_json::Value as Json;
    match json {
      Json::Null => Self::Null,
      Json::Bool(b) => Self::Bool(b),
      Json::Number(n) => match n.as_i64() {
        Some(i) => Self::Integer(i),
        None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
      },
      Json::String(s) => Self::Text(s),
      Json::Array(items) => {
        Self::List(items.into_iter().map(Self::from_json).collect())
      }
      Json::Object(map) => Self::Map(
        map.into_iter().map(|(k, v)| (k, Self::from_json(v))).collect(),
      ),
    }
  }

  /// Encode any serialisable host type through its serde representation.
  pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
    Ok(Self::from_json(serde_json::to_value(value)?))
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self { Self::Bool(b) }
}

impl From<i64> for Value {
  fn from(i: i64) -> Self { Self::Integer(i) }
}

impl From<i32> for Value {
  fn from(i: i32) -> Self { Self::Integer(i.into()) }
}

impl From<u32> for Value {
  fn from(i: u32) -> Self { Self::Integer(i.into()) }
}

impl From<f64> for Value {
  fn from(f: f64) -> Self { Self::Float(f) }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for Value {
  fn from(s: String) -> Self { Self::Text(s) }
}

impl From<DateTime<Utc>> for Value {
  fn from(dt: DateTime<Utc>) -> Self { Self::Timestamp(dt) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(opt: Option<T>) -> Self { opt.map_or(Self::Null, Into::into) }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
  fn from(items: Vec<T>) -> Self {
    Self::List(items.into_iter().map(Into::into).collect())
  }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// The monitored values of a record at one instant. Never persisted directly.
///
/// Derived properties are read by the host when taking the snapshot and sit
/// alongside stored columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(BTreeMap<String, Value>);

static NULL: Value = Value::Null;

impl Snapshot {
  pub fn new() -> Self { Self::default() }

  /// Builder-style insert.
  pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
    self.insert(field, value);
    self
  }

  pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) {
    self.0.insert(field.into(), value.into());
  }

  pub fn get(&self, field: &str) -> Option<&Value> { self.0.get(field) }

  /// The value of `field`, or the null marker when the field is absent.
  pub fn value(&self, field: &str) -> &Value { self.0.get(field).unwrap_or(&NULL) }

  pub fn contains(&self, field: &str) -> bool { self.0.contains_key(field) }

  /// Overlay every field of `other` onto this snapshot.
  pub fn merge(&mut self, other: Snapshot) { self.0.extend(other.0); }
}

impl<K, V> FromIterator<(K, V)> for Snapshot
where
  K: Into<String>,
  V: Into<Value>,
{
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn nested_values_compare_structurally() {
    let a = Value::Map(BTreeMap::from([
      ("stops".to_owned(), Value::from(vec![1_i64, 2, 3])),
      ("driver".to_owned(), Value::reference("rides::driver", 42)),
    ]));
    let b = a.clone();
    assert_eq!(a, b);

    let c = Value::Map(BTreeMap::from([
      ("stops".to_owned(), Value::from(vec![1_i64, 2])),
      ("driver".to_owned(), Value::reference("rides::driver", 42)),
    ]));
    assert_ne!(a, c);
  }

  #[test]
  fn canonical_rejects_nan_inside_lists() {
    let v = Value::List(vec![Value::Integer(1), Value::Float(f64::NAN)]);
    assert!(matches!(v.canonical(), Err(Error::Unserializable(_))));
    assert!(Value::Float(1.5).canonical().is_ok());
  }

  #[test]
  fn canonical_reference_uses_identity() {
    let encoded = Value::reference("rides::driver", 42).canonical().unwrap();
    assert!(encoded.contains("rides::driver"));
    assert!(encoded.contains("42"));
  }

  #[test]
  fn from_json_maps_numbers_by_kind() {
    let v = Value::from_json(serde_json::json!({ "n": 3, "f": 2.5, "s": "x" }));
    let Value::Map(map) = v else { panic!("expected map") };
    assert_eq!(map["n"], Value::Integer(3));
    assert_eq!(map["f"], Value::Float(2.5));
    assert_eq!(map["s"], Value::Text("x".into()));
  }

  #[test]
  fn from_serialize_goes_through_serde() {
    #[derive(Serialize)]
    struct Stop {
      seq:  u32,
      name: &'static str,
    }
    let v = Value::from_serialize(&Stop { seq: 2, name: "depot" }).unwrap();
    assert_eq!(
      v,
      Value::Map(BTreeMap::from([
        ("name".to_owned(), Value::from("depot")),
        ("seq".to_owned(), Value::Integer(2)),
      ])),
    );
  }

  #[test]
  fn snapshot_missing_field_reads_as_null() {
    let snap = Snapshot::new().with("status", "pending");
    assert_eq!(snap.value("status"), &Value::from("pending"));
    assert!(snap.value("driver_id").is_null());
    assert!(!snap.contains("driver_id"));
  }

  #[test]
  fn value_blob_round_trips() {
    let v = Value::Map(BTreeMap::from([
      ("when".to_owned(), Value::Timestamp(Utc::now())),
      ("none".to_owned(), Value::Null),
    ]));
    let json = serde_json::to_string(&v).unwrap();
    let back: Value = serde_json::from_str(&json).unwrap();
    assert_eq!(v, back);
  }
}
