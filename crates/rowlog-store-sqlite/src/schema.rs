//! SQL schema for the rowlog SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE ... IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- Entries are append-only. The only UPDATE ever issued flips `notified`
-- from 0 to 1.
CREATE TABLE IF NOT EXISTS change_log (
    entry_id              INTEGER PRIMARY KEY AUTOINCREMENT,
    namespace             TEXT    NOT NULL,
    record_type           TEXT    NOT NULL,
    record_id             INTEGER NOT NULL,
    field_names           TEXT    NOT NULL,   -- comma-joined, configuration order
    change_set            TEXT    NOT NULL,   -- JSON ChangeSet
    fingerprint           TEXT    NOT NULL,
    property_fingerprints TEXT    NOT NULL DEFAULT '{}',
    created_at            TEXT    NOT NULL,   -- RFC 3339 UTC, fixed microsecond width
    notified              INTEGER NOT NULL DEFAULT 0,
    UNIQUE (fingerprint)
);

CREATE INDEX IF NOT EXISTS change_log_record_idx
    ON change_log(record_type, record_id, created_at);

PRAGMA user_version = 1;
";
