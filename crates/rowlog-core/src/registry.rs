//! Registration of monitored record types and their notification callbacks.
//!
//! A [`Registry`] is built once at startup from explicit registrations and/or
//! a [`ChangeLogConfig`], then handed to the engine. Configuration errors are
//! contained to their namespace: a broken namespace is logged and left
//! unmonitored while the rest keep working.

use std::{
  collections::{BTreeMap, BTreeSet, HashMap, HashSet},
  fmt,
  sync::Arc,
};

use crate::{
  Error, Result,
  change::{MonitoredFields, RecordKey},
  config::{ChangeLogConfig, NamespaceConfig},
  entry::ChangeLogEntry,
};

// ─── Callbacks ───────────────────────────────────────────────────────────────

pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Receives entries whose notifiable field set is non-empty.
///
/// Delivery is synchronous and best-effort: errors are logged by the engine
/// and never retried.
pub trait NotifyCallback: Send + Sync {
  fn notify(
    &self,
    entry: &ChangeLogEntry,
    fields: &BTreeSet<String>,
  ) -> Result<(), CallbackError>;
}

impl<F> NotifyCallback for F
where
  F: Fn(&ChangeLogEntry, &BTreeSet<String>) -> Result<(), CallbackError> + Send + Sync,
{
  fn notify(
    &self,
    entry: &ChangeLogEntry,
    fields: &BTreeSet<String>,
  ) -> Result<(), CallbackError> {
    self(entry, fields)
  }
}

// ─── Registration ────────────────────────────────────────────────────────────

/// One monitored record type.
#[derive(Clone)]
pub struct Registration {
  pub namespace:   String,
  pub record_type: String,
  pub fields:      MonitoredFields,
  pub callback:    Option<Arc<dyn NotifyCallback>>,
}

impl Registration {
  pub fn key(&self, record_id: i64) -> RecordKey {
    RecordKey::new(&self.namespace, &self.record_type, record_id)
  }

  fn validate(&self) -> Result<()> {
    if self.fields.is_empty() {
      return Err(Error::config(
        &self.namespace,
        format!("record type {:?} monitors no fields", self.record_type),
      ));
    }
    let mut seen = HashSet::new();
    for name in self.fields.names() {
      if name.is_empty() || name.contains(',') {
        return Err(Error::config(
          &self.namespace,
          format!("invalid field name {name:?} on {:?}", self.record_type),
        ));
      }
      if !seen.insert(name) {
        return Err(Error::config(
          &self.namespace,
          format!("field {name:?} listed twice on {:?}", self.record_type),
        ));
      }
    }
    Ok(())
  }
}

impl fmt::Debug for Registration {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Registration")
      .field("namespace", &self.namespace)
      .field("record_type", &self.record_type)
      .field("fields", &self.fields)
      .field("callback", &self.callback.is_some())
      .finish()
  }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Read-only lookup from record type to its registration.
#[derive(Debug, Default)]
pub struct Registry {
  by_type: HashMap<String, Arc<Registration>>,
  skipped: BTreeSet<String>,
}

impl Registry {
  pub fn builder() -> RegistryBuilder { RegistryBuilder::default() }

  pub fn get(&self, record_type: &str) -> Option<&Arc<Registration>> {
    self.by_type.get(record_type)
  }

  pub fn is_monitored(&self, record_type: &str) -> bool {
    self.by_type.contains_key(record_type)
  }

  pub fn is_empty(&self) -> bool { self.by_type.is_empty() }

  /// Namespaces that failed validation and are therefore not monitored.
  pub fn skipped_namespaces(&self) -> &BTreeSet<String> { &self.skipped }

  /// Validate one namespace's registrations and admit them all, or none.
  fn admit(&mut self, namespace: &str, regs: Vec<Registration>) -> Result<()> {
    let mut types = HashSet::new();
    for reg in &regs {
      reg.validate()?;
      if self.by_type.contains_key(&reg.record_type) || !types.insert(&reg.record_type) {
        return Err(Error::config(
          namespace,
          format!("record type {:?} is registered more than once", reg.record_type),
        ));
      }
    }
    for reg in regs {
      self.by_type.insert(reg.record_type.clone(), Arc::new(reg));
    }
    Ok(())
  }
}

// ─── Builder ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RegistryBuilder {
  callbacks: HashMap<String, Arc<dyn NotifyCallback>>,
  config:    Option<ChangeLogConfig>,
  explicit:  Vec<Registration>,
}

impl RegistryBuilder {
  /// Make a callback available to configuration under `name`.
  pub fn callback(mut self, name: impl Into<String>, callback: impl NotifyCallback + 'static) -> Self {
    self.callbacks.insert(name.into(), Arc::new(callback));
    self
  }

  pub fn config(mut self, config: ChangeLogConfig) -> Self {
    self.config = Some(config);
    self
  }

  /// Register a record type directly, bypassing configuration.
  pub fn register(
    mut self,
    namespace: impl Into<String>,
    record_type: impl Into<String>,
    fields: MonitoredFields,
    callback: Option<Arc<dyn NotifyCallback>>,
  ) -> Self {
    self.explicit.push(Registration {
      namespace: namespace.into(),
      record_type: record_type.into(),
      fields,
      callback,
    });
    self
  }

  pub fn build(self) -> Registry {
    let mut registry = Registry::default();
    let config = self.config.unwrap_or_default();

    if !config.enabled {
      tracing::info!("change logging disabled by configuration");
      return registry;
    }

    let mut by_namespace: BTreeMap<String, Vec<Registration>> = BTreeMap::new();
    let mut failed: BTreeMap<String, Error> = BTreeMap::new();

    for (namespace, ns_config) in &config.namespaces {
      match resolve_namespace(&self.callbacks, namespace, ns_config) {
        Ok(regs) => by_namespace.entry(namespace.clone()).or_default().extend(regs),
        Err(e) => {
          failed.insert(namespace.clone(), e);
        }
      }
    }
    for reg in self.explicit {
      by_namespace.entry(reg.namespace.clone()).or_default().push(reg);
    }

    for (namespace, regs) in by_namespace {
      if failed.contains_key(&namespace) {
        continue;
      }
      if let Err(e) = registry.admit(&namespace, regs) {
        failed.insert(namespace, e);
      }
    }

    for (namespace, error) in failed {
      tracing::error!(namespace = %namespace, error = %error, "namespace will not be monitored");
      registry.skipped.insert(namespace);
    }

    registry
  }
}

fn resolve_namespace(
  callbacks: &HashMap<String, Arc<dyn NotifyCallback>>,
  namespace: &str,
  config: &NamespaceConfig,
) -> Result<Vec<Registration>> {
  config
    .record_types
    .iter()
    .map(|(record_type, rt_config)| {
      let callback = rt_config
        .callback
        .as_ref()
        .map(|name| {
          callbacks.get(name).cloned().ok_or_else(|| {
            Error::config(namespace, format!("unknown callback {name:?} for {record_type:?}"))
          })
        })
        .transpose()?;
      Ok(Registration {
        namespace: namespace.to_owned(),
        record_type: record_type.clone(),
        fields: rt_config.monitored_fields(),
        callback,
      })
    })
    .collect()
}
