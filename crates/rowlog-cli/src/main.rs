//! `rowlog` — drive and inspect a rowlog change history.
//!
//! Reads `rowlog.toml` (or the path given with `--config`), opens the SQLite
//! store it names, and either replays a stream of record writes through the
//! change logger or reports on the entries already logged.
//!
//! # Usage
//!
//! ```
//! rowlog replay demos/trips.jsonl
//! rowlog latest --type trip --id 7 --field status
//! rowlog history --type trip --limit 20
//! rowlog show 3
//! ```

mod replay;
mod report;

use std::{
  collections::BTreeSet,
  path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use rowlog_core::{
  ChangeLogger,
  config::ChangeLogConfig,
  entry::{ChangeLogEntry, EntryQuery},
  registry::{CallbackError, Registry},
};
use rowlog_store_sqlite::SqliteStore;
use serde::Deserialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Field-level change log for database records")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "rowlog.toml")]
  config: PathBuf,

  /// Override the store path from the configuration file.
  #[arg(long, value_name = "FILE")]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Replay a JSON-lines stream of record writes through the change logger.
  Replay {
    /// One write per line: `{"record_type": .., "record_id": .., "fields": {..}}`.
    file: PathBuf,
  },
  /// Show the most recent entry for a record.
  Latest {
    #[arg(long = "type", value_name = "RECORD_TYPE")]
    record_type: String,
    #[arg(long = "id", value_name = "RECORD_ID")]
    record_id:   i64,
    /// Only consider entries that recorded this field.
    #[arg(long)]
    field:       Option<String>,
  },
  /// List logged entries, newest first.
  History {
    #[arg(long)]
    namespace:   Option<String>,
    #[arg(long = "type", value_name = "RECORD_TYPE")]
    record_type: Option<String>,
    #[arg(long = "id", value_name = "RECORD_ID")]
    record_id:   Option<i64>,
    #[arg(long, default_value_t = 50)]
    limit:       usize,
    #[arg(long, default_value_t = 0)]
    offset:      usize,
  },
  /// Show one entry with its old values, notifiable fields and predecessor.
  Show { entry_id: i64 },
}

// ─── Config file ──────────────────────────────────────────────────────────────

fn default_store_path() -> PathBuf { PathBuf::from("rowlog.db") }

#[derive(Debug, Deserialize)]
struct AppConfig {
  #[serde(default = "default_store_path")]
  store_path: PathBuf,
  #[serde(default)]
  changelog:  ChangeLogConfig,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config.clone()).required(false))
    .add_source(
      config::Environment::with_prefix("ROWLOG")
        .separator("__")
        .try_parsing(true),
    )
    .build()
    .context("failed to read config file")?;

  let app_cfg: AppConfig = settings
    .try_deserialize()
    .context("failed to deserialise configuration")?;

  let store_path = expand_tilde(cli.store.as_deref().unwrap_or(&app_cfg.store_path));
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let registry = Registry::builder()
    .callback("log", log_notification)
    .config(app_cfg.changelog)
    .build();
  if !registry.skipped_namespaces().is_empty() {
    tracing::warn!(
      skipped = ?registry.skipped_namespaces(),
      "some namespaces are misconfigured and will not be monitored"
    );
  }
  let logger = ChangeLogger::new(store, registry);

  match cli.command {
    Command::Replay { file } => {
      let summary = replay::replay_file(&logger, &file).await?;
      println!(
        "replayed {} writes ({} monitored), {} deletes, {} malformed lines skipped",
        summary.writes, summary.monitored, summary.deletes, summary.skipped,
      );
    }
    Command::Latest { record_type, record_id, field } => {
      let entry = logger
        .latest_entry(&record_type, record_id, field.as_deref())
        .await
        .context("failed to query latest entry")?;
      match entry {
        Some(entry) => report::print_detail(&logger, &entry).await?,
        None => println!("no entries for {record_type}/{record_id}"),
      }
    }
    Command::History { namespace, record_type, record_id, limit, offset } => {
      let query = EntryQuery {
        namespace,
        record_type,
        record_id,
        limit: Some(limit),
        offset: Some(offset),
      };
      let entries = logger
        .list_entries(&query)
        .await
        .context("failed to list entries")?;
      report::print_table(&entries);
    }
    Command::Show { entry_id } => {
      let entry = logger
        .get_entry(entry_id)
        .await
        .context("failed to read entry")?
        .with_context(|| format!("no entry with id {entry_id}"))?;
      report::print_detail(&logger, &entry).await?;
    }
  }

  Ok(())
}

/// The built-in `log` callback: emit notifiable changes as tracing events.
fn log_notification(
  entry: &ChangeLogEntry,
  fields: &BTreeSet<String>,
) -> Result<(), CallbackError> {
  tracing::info!(
    namespace = %entry.namespace,
    record_type = %entry.record_type,
    record_id = entry.record_id,
    entry_id = entry.entry_id,
    fields = ?fields,
    "record changed"
  );
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
