//! An in-process [`ChangeHistoryStore`], for tests and embedding hosts that
//! do not need durability.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{
  change::RecordKey,
  entry::{ChangeLogEntry, EntryQuery, NewEntry},
  fingerprint::Fingerprint,
  store::{AppendOutcome, ChangeHistoryStore},
};

#[derive(Debug, Error)]
pub enum MemoryStoreError {
  #[error("memory store lock poisoned")]
  Poisoned,
}

#[derive(Default)]
struct Inner {
  next_id: i64,
  entries: Vec<ChangeLogEntry>,
}

/// Cloning is cheap; clones share the same entries.
#[derive(Clone, Default)]
pub struct MemoryStore {
  inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  pub fn len(&self) -> usize {
    self.inner.read().map(|i| i.entries.len()).unwrap_or_default()
  }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  fn latest_where(
    &self,
    pred: impl Fn(&ChangeLogEntry) -> bool,
  ) -> Result<Option<ChangeLogEntry>, MemoryStoreError> {
    let inner = self.inner.read().map_err(|_| MemoryStoreError::Poisoned)?;
    Ok(
      inner
        .entries
        .iter()
        .filter(|e| pred(e))
        .max_by_key(|e| e.position())
        .cloned(),
    )
  }
}

impl ChangeHistoryStore for MemoryStore {
  type Error = MemoryStoreError;

  async fn append(&self, entry: NewEntry) -> Result<AppendOutcome, Self::Error> {
    let mut inner = self.inner.write().map_err(|_| MemoryStoreError::Poisoned)?;
    if inner.entries.iter().any(|e| e.fingerprint == entry.fingerprint) {
      return Ok(AppendOutcome::DuplicateFingerprint);
    }
    inner.next_id += 1;
    let stored = entry.into_entry(inner.next_id);
    inner.entries.push(stored.clone());
    Ok(AppendOutcome::Appended(stored))
  }

  async fn mark_notified(&self, entry_id: i64) -> Result<bool, Self::Error> {
    let mut inner = self.inner.write().map_err(|_| MemoryStoreError::Poisoned)?;
    match inner.entries.iter_mut().find(|e| e.entry_id == entry_id) {
      Some(entry) if !entry.notified => {
        entry.notified = true;
        Ok(true)
      }
      _ => Ok(false),
    }
  }

  async fn fingerprint_exists(&self, fingerprint: &Fingerprint) -> Result<bool, Self::Error> {
    let inner = self.inner.read().map_err(|_| MemoryStoreError::Poisoned)?;
    Ok(inner.entries.iter().any(|e| e.fingerprint == *fingerprint))
  }

  async fn get_entry(&self, entry_id: i64) -> Result<Option<ChangeLogEntry>, Self::Error> {
    self.latest_where(|e| e.entry_id == entry_id)
  }

  async fn latest_entry(
    &self,
    record_type: &str,
    record_id: i64,
    field_name: Option<&str>,
  ) -> Result<Option<ChangeLogEntry>, Self::Error> {
    self.latest_where(|e| {
      e.record_type == record_type
        && e.record_id == record_id
        && field_name.is_none_or(|f| e.records_field(f))
    })
  }

  async fn latest_before(
    &self,
    key: &RecordKey,
    field_name: Option<&str>,
    before: Option<DateTime<Utc>>,
  ) -> Result<Option<ChangeLogEntry>, Self::Error> {
    self.latest_where(|e| {
      e.namespace == key.namespace
        && e.record_type == key.record_type
        && e.record_id == key.record_id
        && field_name.is_none_or(|f| e.records_field(f))
        && before.is_none_or(|at| e.created_at < at)
    })
  }

  async fn list_entries(&self, query: &EntryQuery) -> Result<Vec<ChangeLogEntry>, Self::Error> {
    let inner = self.inner.read().map_err(|_| MemoryStoreError::Poisoned)?;
    let mut matching: Vec<ChangeLogEntry> =
      inner.entries.iter().filter(|e| query.matches(e)).cloned().collect();
    matching.sort_by_key(|e| std::cmp::Reverse(e.position()));
    Ok(
      matching
        .into_iter()
        .skip(query.offset.unwrap_or(0))
        .take(query.limit.unwrap_or(usize::MAX))
        .collect(),
    )
  }
}
