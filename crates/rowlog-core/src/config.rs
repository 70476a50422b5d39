//! Configuration types: which record types are monitored, per namespace.
//!
//! These are plain serde types; loading them (file, environment) is the
//! host's business. [`crate::registry::RegistryBuilder::config`] validates and
//! resolves them into registrations.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::change::{FieldKind, FieldSpec, MonitoredFields};

fn default_enabled() -> bool { true }

/// Top-level change log configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeLogConfig {
  /// Master switch; when false nothing is monitored.
  #[serde(default = "default_enabled")]
  pub enabled:    bool,
  #[serde(default)]
  pub namespaces: BTreeMap<String, NamespaceConfig>,
}

impl Default for ChangeLogConfig {
  fn default() -> Self { Self { enabled: true, namespaces: BTreeMap::new() } }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NamespaceConfig {
  #[serde(default)]
  pub record_types: BTreeMap<String, RecordTypeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordTypeConfig {
  pub fields:   Vec<FieldConfig>,
  /// Name of a callback registered with the registry builder. Without one,
  /// entries are logged but never notified.
  #[serde(default)]
  pub callback: Option<String>,
}

impl RecordTypeConfig {
  pub fn monitored_fields(&self) -> MonitoredFields {
    self.fields.iter().map(FieldConfig::to_spec).collect()
  }
}

/// A monitored field: either a bare name (a stored column) or a table with an
/// explicit kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FieldConfig {
  Name(String),
  Detailed {
    name: String,
    #[serde(default)]
    kind: FieldKind,
  },
}

impl FieldConfig {
  pub fn to_spec(&self) -> FieldSpec {
    match self {
      Self::Name(name) => FieldSpec::stored(name.clone()),
      Self::Detailed { name, kind } => FieldSpec { name: name.clone(), kind: *kind },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fields_accept_bare_names_and_tables() {
    let json = serde_json::json!({
      "namespaces": {
        "rides": {
          "record_types": {
            "trip": {
              "fields": ["status", { "name": "eta_bucket", "kind": "derived" }],
              "callback": "dispatch"
            }
          }
        }
      }
    });
    let cfg: ChangeLogConfig = serde_json::from_value(json).unwrap();
    assert!(cfg.enabled);

    let trip = &cfg.namespaces["rides"].record_types["trip"];
    assert_eq!(trip.callback.as_deref(), Some("dispatch"));

    let fields = trip.monitored_fields();
    assert_eq!(fields.names().collect::<Vec<_>>(), ["status", "eta_bucket"]);
    assert!(fields.is_derived("eta_bucket"));
  }

  #[test]
  fn enabled_can_be_switched_off() {
    let cfg: ChangeLogConfig =
      serde_json::from_value(serde_json::json!({ "enabled": false })).unwrap();
    assert!(!cfg.enabled);
    assert!(cfg.namespaces.is_empty());
  }
}
