//! Content fingerprints for change log entries.
//!
//! A fingerprint is the first 128 bits of a SHA-256 digest over the canonical
//! string form of its parts, hex-encoded. Parts are separated by a unit
//! separator byte so that `("ab", "c")` and `("a", "bc")` never collide.
//! Nothing depends on memory addresses or hash-map iteration order, so the
//! same logical input yields the same fingerprint on every host.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
  Result,
  change::{ChangeSet, MonitoredFields, RecordKey},
  value::Value,
};

const SEPARATOR: &[u8] = b"\x1f";
const DIGEST_BYTES: usize = 16;

// ─── Fingerprint ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
  /// Wrap a previously computed hex digest, e.g. one read back from storage.
  pub fn from_hex(hex: impl Into<String>) -> Self { Self(hex.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Fingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

// ─── Parts ───────────────────────────────────────────────────────────────────

/// Anything that can contribute a deterministic string to a fingerprint.
pub trait Canonical {
  fn canonical_form(&self) -> Result<String>;
}

impl Canonical for &str {
  fn canonical_form(&self) -> Result<String> { Ok((*self).to_owned()) }
}

impl Canonical for String {
  fn canonical_form(&self) -> Result<String> { Ok(self.clone()) }
}

impl Canonical for i64 {
  fn canonical_form(&self) -> Result<String> { Ok(self.to_string()) }
}

impl Canonical for Value {
  fn canonical_form(&self) -> Result<String> { self.canonical() }
}

/// A `field:value` pair.
impl Canonical for (&str, &Value) {
  fn canonical_form(&self) -> Result<String> {
    Ok(format!("{}:{}", self.0, self.1.canonical()?))
  }
}

/// Hash an ordered sequence of parts.
pub fn fingerprint(parts: &[&dyn Canonical]) -> Result<Fingerprint> {
  let mut hasher = Sha256::new();
  for part in parts {
    hasher.update(part.canonical_form()?.as_bytes());
    hasher.update(SEPARATOR);
  }
  let hash = hasher.finalize();
  Ok(Fingerprint(hex::encode(&hash[..DIGEST_BYTES])))
}

/// Fingerprint of a whole entry: record identity, the comma-joined field
/// list, then each new value in sorted field order.
pub fn entry_fingerprint(
  key: &RecordKey,
  field_names: &[String],
  new_values: &BTreeMap<String, Value>,
) -> Result<Fingerprint> {
  let joined = field_names.join(",");
  let pairs: Vec<(&str, &Value)> =
    new_values.iter().map(|(k, v)| (k.as_str(), v)).collect();

  let mut parts: Vec<&dyn Canonical> = Vec::with_capacity(4 + pairs.len());
  parts.push(&key.namespace);
  parts.push(&key.record_type);
  parts.push(&key.record_id);
  parts.push(&joined);
  parts.extend(pairs.iter().map(|p| p as &dyn Canonical));
  fingerprint(&parts)
}

/// Fingerprint of one property's new value, independent of anything else in
/// the entry.
pub fn property_fingerprint(value: &Value) -> Result<Fingerprint> {
  fingerprint(&[value])
}

/// One fingerprint per derived property present in `change_set`.
pub fn property_fingerprints(
  fields: &MonitoredFields,
  change_set: &ChangeSet,
) -> Result<BTreeMap<String, Fingerprint>> {
  fields
    .derived()
    .filter_map(|name| change_set.get(name).map(|c| (name, c)))
    .map(|(name, change)| {
      Ok((name.to_owned(), property_fingerprint(&change.new_value)?))
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;
  use crate::{
    Error,
    change::{Change, FieldSpec},
  };

  fn trip() -> RecordKey { RecordKey::new("rides", "trip", 7) }

  fn fields() -> Vec<String> { vec!["status".into(), "driver_id".into()] }

  #[test]
  fn mapping_order_does_not_matter() {
    // Build the same logical mapping from two differently ordered sources.
    let forward: HashMap<&str, Value> =
      [("status", Value::from("completed")), ("driver_id", Value::from(42_i64))]
        .into_iter()
        .collect();
    let backward: HashMap<&str, Value> =
      [("driver_id", Value::from(42_i64)), ("status", Value::from("completed"))]
        .into_iter()
        .collect();

    let a: BTreeMap<String, Value> =
      forward.into_iter().map(|(k, v)| (k.to_owned(), v)).collect();
    let b: BTreeMap<String, Value> =
      backward.into_iter().map(|(k, v)| (k.to_owned(), v)).collect();

    assert_eq!(
      entry_fingerprint(&trip(), &fields(), &a).unwrap(),
      entry_fingerprint(&trip(), &fields(), &b).unwrap(),
    );
  }

  #[test]
  fn fingerprint_is_128_bit_hex() {
    let fp = property_fingerprint(&Value::from("x")).unwrap();
    assert_eq!(fp.as_str().len(), 32);
    assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn record_identity_participates() {
    let values = BTreeMap::from([("status".to_owned(), Value::from("pending"))]);
    let other = RecordKey::new("rides", "trip", 8);
    assert_ne!(
      entry_fingerprint(&trip(), &fields(), &values).unwrap(),
      entry_fingerprint(&other, &fields(), &values).unwrap(),
    );
  }

  #[test]
  fn part_boundaries_are_unambiguous() {
    let a = fingerprint(&[&"ab", &"c"]).unwrap();
    let b = fingerprint(&[&"a", &"bc"]).unwrap();
    assert_ne!(a, b);
  }

  #[test]
  fn property_fingerprints_cover_only_derived_fields() {
    let monitored = MonitoredFields::new(vec![
      FieldSpec::stored("status"),
      FieldSpec::derived("eta_bucket"),
      FieldSpec::derived("fare_band"),
    ]);
    let set = ChangeSet {
      changes: BTreeMap::from([
        ("status".to_owned(), Change::new("pending", "completed")),
        ("eta_bucket".to_owned(), Change::new("5m", "10m")),
      ]),
      created: false,
    };

    let fps = property_fingerprints(&monitored, &set).unwrap();
    assert_eq!(fps.len(), 1);
    assert_eq!(
      fps["eta_bucket"],
      property_fingerprint(&Value::from("10m")).unwrap()
    );
  }

  #[test]
  fn unserializable_value_fails() {
    let values = BTreeMap::from([("speed".to_owned(), Value::Float(f64::INFINITY))]);
    let err = entry_fingerprint(&trip(), &["speed".into()], &values).unwrap_err();
    assert!(matches!(err, Error::Unserializable(_)));
  }
}
