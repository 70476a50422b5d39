//! Replay a JSON-lines stream of record writes through the write hooks.
//!
//! The replayer plays the part of a host application: it keeps the current
//! state of every record it has seen, hands the prior state to
//! [`ChangeLogger::pre_write`], applies the write, then calls
//! [`ChangeLogger::post_write`]. State is not persisted between runs, so the
//! first write to each record in a stream is a first observation.

use std::{collections::HashMap, convert::Infallible, path::Path};

use anyhow::Context as _;
use rowlog_core::{
  ChangeLogger,
  store::ChangeHistoryStore,
  value::{Snapshot, Value},
};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, BufReader};

/// One line of the input stream. `fields: null` deletes the record.
#[derive(Debug, Deserialize)]
struct WriteEvent {
  record_type: String,
  record_id:   i64,
  #[serde(default)]
  fields:      Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Default)]
pub struct ReplaySummary {
  pub writes:    usize,
  pub monitored: usize,
  pub deletes:   usize,
  pub skipped:   usize,
}

pub async fn replay_file<S: ChangeHistoryStore>(
  logger: &ChangeLogger<S>,
  path: &Path,
) -> anyhow::Result<ReplaySummary> {
  let file = tokio::fs::File::open(path)
    .await
    .with_context(|| format!("failed to open {}", path.display()))?;
  replay(logger, BufReader::new(file)).await
}

/// Replay every write read from `input`, one JSON object per line.
pub async fn replay<S, R>(logger: &ChangeLogger<S>, input: R) -> anyhow::Result<ReplaySummary>
where
  S: ChangeHistoryStore,
  R: AsyncBufRead + Unpin,
{
  let mut lines = input.lines();

  let mut records: HashMap<(String, i64), Snapshot> = HashMap::new();
  let mut summary = ReplaySummary::default();
  let mut line_no = 0_usize;

  while let Some(line) = lines.next_line().await.context("failed to read input")? {
    line_no += 1;
    if line.trim().is_empty() {
      continue;
    }
    let event: WriteEvent = match serde_json::from_str(&line) {
      Ok(event) => event,
      Err(e) => {
        tracing::warn!(line = line_no, error = %e, "skipping malformed write");
        summary.skipped += 1;
        continue;
      }
    };

    let key = (event.record_type, event.record_id);
    let Some(fields) = event.fields else {
      // Deletes are applied but never logged.
      records.remove(&key);
      summary.deletes += 1;
      continue;
    };

    let prior = records.get(&key).cloned();
    let pending = logger.pre_write(&key.0, Ok::<_, Infallible>(prior.clone()));
    if pending.is_some() {
      summary.monitored += 1;
    }

    let mut new = prior.unwrap_or_default();
    new.merge(
      fields
        .into_iter()
        .map(|(name, value)| (name, Value::from_json(value)))
        .collect(),
    );

    let new = logger.post_write(pending, key.1, &new, new.clone()).await;
    records.insert(key, new);
    summary.writes += 1;
  }

  Ok(summary)
}
