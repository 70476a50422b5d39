//! [`ChangeLogger`] — the engine and its write hooks.
//!
//! A host wraps every write to a monitored record in two calls:
//!
//! 1. [`ChangeLogger::pre_write`] before the write, with the record's prior
//!    state (or the error from reading it);
//! 2. [`ChangeLogger::post_write`] after the write, with the new state and the
//!    write's own result, which is handed back untouched.
//!
//! Nothing in between can fail the write: every error is logged with the
//! record's identity and swallowed.

use std::{
  collections::BTreeMap,
  fmt,
  sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
  },
};

use chrono::{DateTime, Utc};

use crate::{
  Error, Result,
  change::RecordKey,
  diff::diff,
  entry::{ChangeLogEntry, EntryQuery},
  registry::{Registration, Registry},
  store::ChangeHistoryStore,
  value::{Snapshot, Value},
};

// ─── Clock ───────────────────────────────────────────────────────────────────

/// Hands out strictly increasing microsecond timestamps.
#[derive(Debug, Default)]
pub(crate) struct MonotonicClock {
  last_micros: AtomicI64,
}

/// Shared by every [`ChangeLogger`] so that no two entries created by one
/// process share a `created_at`.
static CLOCK: MonotonicClock = MonotonicClock::new();

impl MonotonicClock {
  pub(crate) const fn new() -> Self { Self { last_micros: AtomicI64::new(0) } }

  pub(crate) fn now(&self) -> DateTime<Utc> {
    let wall = Utc::now().timestamp_micros();
    let mut last = self.last_micros.load(Ordering::Relaxed);
    loop {
      let next = wall.max(last + 1);
      match self.last_micros.compare_exchange_weak(
        last,
        next,
        Ordering::AcqRel,
        Ordering::Relaxed,
      ) {
        Ok(_) => return DateTime::from_timestamp_micros(next).unwrap_or_else(Utc::now),
        Err(actual) => last = actual,
      }
    }
  }
}

// ─── PendingWrite ────────────────────────────────────────────────────────────

/// State captured by [`ChangeLogger::pre_write`] for a monitored record.
#[derive(Debug, Clone)]
pub struct PendingWrite {
  registration: Arc<Registration>,
  old:          Option<Snapshot>,
}

impl PendingWrite {
  pub fn old_snapshot(&self) -> Option<&Snapshot> { self.old.as_ref() }
}

// ─── ChangeLogger ────────────────────────────────────────────────────────────

pub struct ChangeLogger<S> {
  pub(crate) store:    S,
  pub(crate) registry: Arc<Registry>,
  pub(crate) clock:    &'static MonotonicClock,
}

impl<S: ChangeHistoryStore> ChangeLogger<S> {
  pub fn new(store: S, registry: Registry) -> Self {
    Self { store, registry: Arc::new(registry), clock: &CLOCK }
  }

  pub fn store(&self) -> &S { &self.store }

  pub fn registry(&self) -> &Registry { &self.registry }

  // ── Write hooks ─────────────────────────────────────────────────────────

  /// Capture the prior state of a record about to be written.
  ///
  /// Returns `None` for record types that are not monitored. A failed read of
  /// the prior state (e.g. the row was deleted underneath us) is treated as
  /// "no prior snapshot", which makes the write a first observation.
  pub fn pre_write<E: fmt::Display>(
    &self,
    record_type: &str,
    prior: Result<Option<Snapshot>, E>,
  ) -> Option<PendingWrite> {
    let registration = self.registry.get(record_type)?.clone();
    let old = match prior {
      Ok(old) => old,
      Err(e) => {
        tracing::warn!(
          namespace = %registration.namespace,
          record_type = %record_type,
          error = %e,
          "prior snapshot unreadable; treating record as newly observed"
        );
        None
      }
    };
    Some(PendingWrite { registration, old })
  }

  /// Log the completed write and notify, then return `write_result`
  /// unchanged whatever happened.
  pub async fn post_write<T>(
    &self,
    pending: Option<PendingWrite>,
    record_id: i64,
    new: &Snapshot,
    write_result: T,
  ) -> T {
    let Some(pending) = pending else {
      return write_result;
    };

    if let Err(e) = self.log_write(&pending, record_id, new).await {
      tracing::error!(
        namespace = %pending.registration.namespace,
        record_type = %pending.registration.record_type,
        record_id,
        error = %e,
        "failed to log change; write unaffected"
      );
    }
    write_result
  }

  /// Diff, record and notify for one write. Returns the appended entry, if
  /// the write produced one.
  pub async fn log_write(
    &self,
    pending: &PendingWrite,
    record_id: i64,
    new: &Snapshot,
  ) -> Result<Option<ChangeLogEntry>> {
    let registration = &pending.registration;
    let key = registration.key(record_id);
    let change_set = diff(pending.old.as_ref(), Some(new), &registration.fields);

    if change_set.is_empty() {
      tracing::debug!(
        namespace = %key.namespace,
        record_type = %key.record_type,
        record_id,
        "no monitored field changed"
      );
      return Ok(None);
    }

    let entry = self.record_change(&key, &registration.fields, change_set).await?;
    if let Some(entry) = &entry {
      self.notify(entry).await?;
    }
    Ok(entry)
  }

  // ── Queries ─────────────────────────────────────────────────────────────

  /// Most recent entry for a record, optionally one that recorded
  /// `field_name`.
  pub async fn latest_entry(
    &self,
    record_type: &str,
    record_id: i64,
    field_name: Option<&str>,
  ) -> Result<Option<ChangeLogEntry>> {
    self
      .store
      .latest_entry(record_type, record_id, field_name)
      .await
      .map_err(Error::store)
  }

  /// The latest entry for the same record created strictly before `entry`.
  /// Always computed from what the store holds now, never cached.
  pub async fn previous_entry(&self, entry: &ChangeLogEntry) -> Result<Option<ChangeLogEntry>> {
    let key = entry.key();
    self
      .store
      .latest_before(&key, None, Some(entry.created_at))
      .await
      .map_err(Error::store)
  }

  pub async fn get_entry(&self, entry_id: i64) -> Result<Option<ChangeLogEntry>> {
    self.store.get_entry(entry_id).await.map_err(Error::store)
  }

  pub async fn list_entries(&self, query: &EntryQuery) -> Result<Vec<ChangeLogEntry>> {
    self.store.list_entries(query).await.map_err(Error::store)
  }

  pub fn new_values(&self, entry: &ChangeLogEntry) -> BTreeMap<String, Value> {
    entry.new_values()
  }

  /// The latest entry for `key` before `before` that recorded `field`.
  pub(crate) async fn last_recording(
    &self,
    key: &RecordKey,
    field: &str,
    before: Option<DateTime<Utc>>,
  ) -> Result<Option<ChangeLogEntry>> {
    self
      .store
      .latest_before(key, Some(field), before)
      .await
      .map_err(Error::store)
  }
}

#[cfg(test)]
mod tests {
  use std::{collections::BTreeSet, sync::Mutex};

  use super::*;
  use crate::{
    change::{Change, FieldSpec, MonitoredFields},
    memory::MemoryStore,
    registry::CallbackError,
    testing::{Recorder, trip_fields},
  };

  fn logger(recorder: &Recorder) -> ChangeLogger<MemoryStore> {
    let registry = Registry::builder()
      .register("rides", "trip", trip_fields(), Some(recorder.callback()))
      .build();
    ChangeLogger::new(MemoryStore::new(), registry)
  }

  #[test]
  fn clock_is_strictly_increasing() {
    let clock = MonotonicClock::new();
    let mut last = clock.now();
    for _ in 0..1000 {
      let next = clock.now();
      assert!(next > last);
      last = next;
    }
  }

  #[tokio::test]
  async fn loggers_in_one_process_share_a_clock() {
    let store = MemoryStore::new();
    let first = ChangeLogger::new(store.clone(), Registry::default());
    let second = ChangeLogger::new(store, Registry::default());
    let key = |id| RecordKey::new("rides", "trip", id);

    let mut stamps = Vec::new();
    for id in 0..50 {
      let log = if id % 2 == 0 { &first } else { &second };
      let set = crate::testing::change_set(&[("status", Value::Null, Value::from("pending"))], true);
      let entry = log.record_change(&key(id), &trip_fields(), set).await.unwrap().unwrap();
      stamps.push(entry.created_at);
    }
    assert!(stamps.windows(2).all(|w| w[0] < w[1]));
  }

  #[tokio::test]
  async fn trip_scenario() {
    let recorder = Recorder::default();
    let log = logger(&recorder);
    let initial = Snapshot::new().with("status", "pending").with("driver_id", Value::Null);

    // Write 1: assign a driver.
    let after_1 = initial.clone().with("driver_id", 42_i64);
    let pending = log.pre_write::<Error>("trip", Ok(Some(initial)));
    let a = log.log_write(&pending.unwrap(), 7, &after_1).await.unwrap().unwrap();
    assert!(!a.change_set.created);
    assert_eq!(a.field_names, ["driver_id"]);
    assert_eq!(a.change_set.get("driver_id"), Some(&Change::new(Value::Null, 42_i64)));
    assert!(log.get_entry(a.entry_id).await.unwrap().unwrap().notified);

    // Write 2: a no-op write.
    let pending = log.pre_write::<Error>("trip", Ok(Some(after_1.clone())));
    assert!(log.log_write(&pending.unwrap(), 7, &after_1).await.unwrap().is_none());

    // Write 3: complete the trip.
    let after_3 = after_1.clone().with("status", "completed");
    let pending = log.pre_write::<Error>("trip", Ok(Some(after_1)));
    let c = log.log_write(&pending.unwrap(), 7, &after_3).await.unwrap().unwrap();
    assert_eq!(c.field_names, ["status"]);
    let previous = log.previous_entry(&c).await.unwrap().unwrap();
    assert_eq!(previous.entry_id, a.entry_id);

    assert_eq!(log.store().len(), 2);
    assert_eq!(recorder.calls(), vec![
      (a.entry_id, vec!["driver_id".to_owned()]),
      (c.entry_id, vec!["status".to_owned()]),
    ]);
  }

  #[tokio::test]
  async fn post_write_returns_write_result_on_failure() {
    let recorder = Recorder::default();
    let log = logger(&recorder);
    let old = Snapshot::new().with("status", "pending");
    let new = Snapshot::new().with("status", Value::Float(f64::NAN));

    let pending = log.pre_write::<Error>("trip", Ok(Some(old)));
    let result: Result<u32, &str> = log.post_write(pending, 7, &new, Ok(5)).await;

    assert_eq!(result, Ok(5));
    assert!(log.store().is_empty());
    assert!(recorder.calls().is_empty());
  }

  #[tokio::test]
  async fn unmonitored_types_pass_straight_through() {
    let recorder = Recorder::default();
    let log = logger(&recorder);
    let pending = log.pre_write::<Error>("invoice", Ok(None));
    assert!(pending.is_none());

    let snap = Snapshot::new().with("total", 10_i64);
    let result = log.post_write(pending, 1, &snap, "written").await;
    assert_eq!(result, "written");
    assert!(log.store().is_empty());
  }

  #[tokio::test]
  async fn unreadable_prior_snapshot_counts_as_first_observation() {
    let recorder = Recorder::default();
    let log = logger(&recorder);
    let pending = log.pre_write("trip", Err("row vanished")).unwrap();
    assert!(pending.old_snapshot().is_none());

    let new = Snapshot::new().with("status", "pending");
    let entry = log.log_write(&pending, 9, &new).await.unwrap().unwrap();
    assert!(entry.change_set.created);
    assert!(!entry.notified);
    assert!(recorder.calls().is_empty());
  }

  #[tokio::test]
  async fn callback_failure_is_contained() {
    let fields = MonitoredFields::new(vec![FieldSpec::stored("status")]);
    let attempts = Arc::new(Mutex::new(0));
    let counter = attempts.clone();
    let registry = Registry::builder()
      .register(
        "rides",
        "trip",
        fields,
        Some(Arc::new(move |_: &ChangeLogEntry, _: &BTreeSet<String>| -> Result<(), CallbackError> {
          *counter.lock().unwrap() += 1;
          Err("downstream unavailable".into())
        })),
      )
      .build();
    let log = ChangeLogger::new(MemoryStore::new(), registry);

    let old = Snapshot::new().with("status", "pending");
    let new = Snapshot::new().with("status", "completed");
    let pending = log.pre_write::<Error>("trip", Ok(Some(old)));
    let result = log.post_write(pending, 3, &new, 1_u8).await;

    assert_eq!(result, 1);
    assert_eq!(*attempts.lock().unwrap(), 1);
    let entry = log.latest_entry("trip", 3, None).await.unwrap().unwrap();
    assert!(entry.notified);
  }

  #[tokio::test]
  async fn panicking_callback_does_not_abort_the_write() {
    let fields = MonitoredFields::new(vec![FieldSpec::stored("status")]);
    let registry = Registry::builder()
      .register(
        "rides",
        "trip",
        fields,
        Some(Arc::new(|_: &ChangeLogEntry, _: &BTreeSet<String>| -> Result<(), CallbackError> {
          panic!("subscriber bug")
        })),
      )
      .build();
    let log = ChangeLogger::new(MemoryStore::new(), registry);

    let old = Snapshot::new().with("status", "pending");
    let new = Snapshot::new().with("status", "completed");
    let pending = log.pre_write::<Error>("trip", Ok(Some(old)));
    assert_eq!(log.post_write(pending, 3, &new, "ok").await, "ok");
    assert_eq!(log.store().len(), 1);
  }
}
