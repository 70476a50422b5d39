//! The `ChangeHistoryStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `rowlog-store-sqlite`,
//! or [`crate::memory::MemoryStore`] for tests). The engine issues queries and
//! appends against it; it never holds entries beyond a single operation.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  change::RecordKey,
  entry::{ChangeLogEntry, EntryQuery, NewEntry},
  fingerprint::Fingerprint,
};

/// Result of [`ChangeHistoryStore::append`].
#[derive(Debug, Clone)]
pub enum AppendOutcome {
  Appended(ChangeLogEntry),
  /// The fingerprint's uniqueness constraint rejected the row: another writer
  /// already recorded this exact change.
  DuplicateFingerprint,
}

/// Abstraction over an append-only change history backend.
///
/// Entries are never updated except for the one-way `notified` flag. All
/// per-record queries order by `created_at`.
pub trait ChangeHistoryStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Writes ────────────────────────────────────────────────────────────

  /// Persist a new entry. A fingerprint collision must be reported as
  /// [`AppendOutcome::DuplicateFingerprint`], not as an error.
  fn append(
    &self,
    entry: NewEntry,
  ) -> impl Future<Output = Result<AppendOutcome, Self::Error>> + Send + '_;

  /// Flip `notified` from false to true. Returns `false` if the entry was
  /// already notified or does not exist.
  fn mark_notified(
    &self,
    entry_id: i64,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  fn fingerprint_exists<'a>(
    &'a self,
    fingerprint: &'a Fingerprint,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  fn get_entry(
    &self,
    entry_id: i64,
  ) -> impl Future<Output = Result<Option<ChangeLogEntry>, Self::Error>> + Send + '_;

  /// Most recent entry for a record type and id, across namespaces,
  /// optionally restricted to entries that recorded `field_name`.
  fn latest_entry<'a>(
    &'a self,
    record_type: &'a str,
    record_id: i64,
    field_name: Option<&'a str>,
  ) -> impl Future<Output = Result<Option<ChangeLogEntry>, Self::Error>> + Send + 'a;

  /// Most recent entry for `key` whose `created_at` is strictly earlier than
  /// `before` (or any entry when `before` is `None`), optionally restricted to
  /// entries that recorded `field_name`.
  fn latest_before<'a>(
    &'a self,
    key: &'a RecordKey,
    field_name: Option<&'a str>,
    before: Option<DateTime<Utc>>,
  ) -> impl Future<Output = Result<Option<ChangeLogEntry>, Self::Error>> + Send + 'a;

  /// Entries matching `query`, newest first.
  fn list_entries<'a>(
    &'a self,
    query: &'a EntryQuery,
  ) -> impl Future<Output = Result<Vec<ChangeLogEntry>, Self::Error>> + Send + 'a;
}
