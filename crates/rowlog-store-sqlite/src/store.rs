//! [`SqliteStore`] — the SQLite implementation of [`ChangeHistoryStore`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;

use rowlog_core::{
  change::RecordKey,
  entry::{ChangeLogEntry, EntryQuery, NewEntry},
  fingerprint::Fingerprint,
  store::{AppendOutcome, ChangeHistoryStore},
};

use crate::{
  Result,
  encode::{
    ENTRY_COLUMNS, RawEntry, encode_change_set, encode_dt, encode_field_names,
    encode_property_fingerprints,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A rowlog change history backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    tracing::debug!("change_log schema ready");
    Ok(())
  }

  /// Run a single-row entry query.
  async fn query_entry(
    &self,
    sql: String,
    params: Vec<rusqlite::types::Value>,
  ) -> Result<Option<ChangeLogEntry>> {
    let raw: Option<RawEntry> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(&sql, rusqlite::params_from_iter(params), RawEntry::from_row)
            .optional()?,
        )
      })
      .await?;

    raw.map(RawEntry::into_entry).transpose()
  }
}

/// SQL predicate matching rows whose comma-joined `field_names` contain the
/// bound parameter.
fn has_field(param: usize) -> String {
  format!("instr(',' || field_names || ',', ',' || ?{param} || ',') > 0")
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
  matches!(
    err,
    rusqlite::Error::SqliteFailure(e, _)
      if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
  )
}

// ─── ChangeHistoryStore impl ─────────────────────────────────────────────────

impl ChangeHistoryStore for SqliteStore {
  type Error = crate::Error;

  // ── Writes ────────────────────────────────────────────────────────────────

  async fn append(&self, entry: NewEntry) -> Result<AppendOutcome> {
    let namespace       = entry.key.namespace.clone();
    let record_type     = entry.key.record_type.clone();
    let record_id       = entry.key.record_id;
    let field_names_str = encode_field_names(&entry.field_names);
    let change_set_str  = encode_change_set(&entry.change_set)?;
    let fingerprint_str = entry.fingerprint.as_str().to_owned();
    let property_str    = encode_property_fingerprints(&entry.property_fingerprints)?;
    let created_at_str  = encode_dt(entry.created_at);

    let inserted: Option<i64> = self
      .conn
      .call(move |conn| {
        let result = conn.execute(
          "INSERT INTO change_log
             (namespace, record_type, record_id, field_names, change_set,
              fingerprint, property_fingerprints, created_at, notified)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)",
          rusqlite::params![
            namespace,
            record_type,
            record_id,
            field_names_str,
            change_set_str,
            fingerprint_str,
            property_str,
            created_at_str,
          ],
        );
        match result {
          Ok(_) => Ok(Some(conn.last_insert_rowid())),
          Err(e) if is_unique_violation(&e) => Ok(None),
          Err(e) => Err(e.into()),
        }
      })
      .await?;

    Ok(match inserted {
      Some(entry_id) => AppendOutcome::Appended(entry.into_entry(entry_id)),
      None => {
        tracing::debug!(fingerprint = %entry.fingerprint, "unique constraint rejected entry");
        AppendOutcome::DuplicateFingerprint
      }
    })
  }

  async fn mark_notified(&self, entry_id: i64) -> Result<bool> {
    let updated = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE change_log SET notified = 1 WHERE entry_id = ?1 AND notified = 0",
          rusqlite::params![entry_id],
        )?)
      })
      .await?;
    Ok(updated == 1)
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn fingerprint_exists(&self, fingerprint: &Fingerprint) -> Result<bool> {
    let fp = fingerprint.as_str().to_owned();
    let exists = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM change_log WHERE fingerprint = ?1",
              rusqlite::params![fp],
              |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false),
        )
      })
      .await?;
    Ok(exists)
  }

  async fn get_entry(&self, entry_id: i64) -> Result<Option<ChangeLogEntry>> {
    self
      .query_entry(
        format!("SELECT {ENTRY_COLUMNS} FROM change_log WHERE entry_id = ?1"),
        vec![entry_id.into()],
      )
      .await
  }

  async fn latest_entry(
    &self,
    record_type: &str,
    record_id: i64,
    field_name: Option<&str>,
  ) -> Result<Option<ChangeLogEntry>> {
    let mut conds = vec!["record_type = ?1".to_owned(), "record_id = ?2".to_owned()];
    let mut params: Vec<rusqlite::types::Value> =
      vec![record_type.to_owned().into(), record_id.into()];
    if let Some(field) = field_name {
      conds.push(has_field(3));
      params.push(field.to_owned().into());
    }

    let sql = format!(
      "SELECT {ENTRY_COLUMNS} FROM change_log
       WHERE {}
       ORDER BY created_at DESC, entry_id DESC
       LIMIT 1",
      conds.join(" AND ")
    );
    self.query_entry(sql, params).await
  }

  async fn latest_before(
    &self,
    key: &RecordKey,
    field_name: Option<&str>,
    before: Option<DateTime<Utc>>,
  ) -> Result<Option<ChangeLogEntry>> {
    let mut conds = vec![
      "namespace = ?1".to_owned(),
      "record_type = ?2".to_owned(),
      "record_id = ?3".to_owned(),
    ];
    let mut params: Vec<rusqlite::types::Value> = vec![
      key.namespace.clone().into(),
      key.record_type.clone().into(),
      key.record_id.into(),
    ];
    if let Some(field) = field_name {
      params.push(field.to_owned().into());
      conds.push(has_field(params.len()));
    }
    if let Some(before) = before {
      params.push(encode_dt(before).into());
      conds.push(format!("created_at < ?{}", params.len()));
    }

    let sql = format!(
      "SELECT {ENTRY_COLUMNS} FROM change_log
       WHERE {}
       ORDER BY created_at DESC, entry_id DESC
       LIMIT 1",
      conds.join(" AND ")
    );
    self.query_entry(sql, params).await
  }

  async fn list_entries(&self, query: &EntryQuery) -> Result<Vec<ChangeLogEntry>> {
    let namespace   = query.namespace.clone();
    let record_type = query.record_type.clone();
    let record_id   = query.record_id;
    let limit_val   = query.limit.map_or(-1, |l| l as i64);
    let offset_val  = query.offset.unwrap_or(0) as i64;

    let raws: Vec<RawEntry> = self
      .conn
      .call(move |conn| {
        let sql = format!(
          "SELECT {ENTRY_COLUMNS} FROM change_log
           WHERE (?1 IS NULL OR namespace = ?1)
             AND (?2 IS NULL OR record_type = ?2)
             AND (?3 IS NULL OR record_id = ?3)
           ORDER BY created_at DESC, entry_id DESC
           LIMIT ?4 OFFSET ?5"
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(
            rusqlite::params![
              namespace.as_deref(),
              record_type.as_deref(),
              record_id,
              limit_val,
              offset_val,
            ],
            RawEntry::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawEntry::into_entry).collect()
  }
}
