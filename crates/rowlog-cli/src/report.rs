//! Plain-text rendering of change log entries.

use std::collections::BTreeMap;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use rowlog_core::{
  ChangeLogger,
  entry::ChangeLogEntry,
  store::ChangeHistoryStore,
  value::Value,
};

fn timestamp(dt: DateTime<Utc>) -> String { dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string() }

/// Render a value the way a person would write it.
pub fn render(value: &Value) -> String {
  match value {
    Value::Null => "null".to_owned(),
    Value::Bool(b) => b.to_string(),
    Value::Integer(i) => i.to_string(),
    Value::Float(f) => f.to_string(),
    Value::Text(s) => format!("{s:?}"),
    Value::Timestamp(dt) => dt.to_rfc3339(),
    Value::Reference { record_type, record_id } => format!("{record_type}#{record_id}"),
    Value::List(items) => {
      let items: Vec<String> = items.iter().map(render).collect();
      format!("[{}]", items.join(", "))
    }
    Value::Map(map) => {
      let pairs: Vec<String> = map.iter().map(|(k, v)| format!("{k}: {}", render(v))).collect();
      format!("{{{}}}", pairs.join(", "))
    }
  }
}

/// One line per entry, newest first as given.
pub fn print_table(entries: &[ChangeLogEntry]) {
  if entries.is_empty() {
    println!("no entries");
    return;
  }
  println!(
    "{:>8}  {:<26}  {:<12}  {:<16}  {:>10}  {:<3}  fields",
    "id", "created", "namespace", "type", "record", "ntf"
  );
  for e in entries {
    println!(
      "{:>8}  {:<26}  {:<12}  {:<16}  {:>10}  {:<3}  {}",
      e.entry_id,
      timestamp(e.created_at),
      e.namespace,
      e.record_type,
      e.record_id,
      if e.notified { "yes" } else { "no" },
      e.field_names.join(","),
    );
  }
}

fn print_values(label: &str, values: &BTreeMap<String, Value>) {
  println!("{label}:");
  for (field, value) in values {
    println!("  {field:<20} {}", render(value));
  }
}

/// Everything known about one entry: its values on both sides of the change,
/// which fields are notifiable, and the entry before it.
pub async fn print_detail<S: ChangeHistoryStore>(
  logger: &ChangeLogger<S>,
  entry: &ChangeLogEntry,
) -> anyhow::Result<()> {
  let old_values = logger
    .old_values_as_of(entry)
    .await
    .context("failed to reconstruct old values")?;
  let notifiable = logger
    .notifiable_fields(entry)
    .await
    .context("failed to resolve notifiable fields")?;
  let previous = logger
    .previous_entry(entry)
    .await
    .context("failed to find previous entry")?;

  println!("entry {}", entry.entry_id);
  println!("  record       {}::{}/{}", entry.namespace, entry.record_type, entry.record_id);
  println!("  created      {}", timestamp(entry.created_at));
  println!("  fingerprint  {}", entry.fingerprint);
  println!("  first seen   {}", if entry.change_set.created { "yes" } else { "no" });
  println!("  notified     {}", if entry.notified { "yes" } else { "no" });
  match &previous {
    Some(prev) => println!("  previous     {} ({})", prev.entry_id, timestamp(prev.created_at)),
    None => println!("  previous     none"),
  }

  print_values("new values", &logger.new_values(entry));
  print_values("old values", &old_values);

  let notifiable: Vec<&str> = notifiable.iter().map(String::as_str).collect();
  if notifiable.is_empty() {
    println!("notifiable: none");
  } else {
    println!("notifiable: {}", notifiable.join(", "));
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn renders_nested_values() {
    let value = Value::Map(BTreeMap::from([
      ("driver".to_owned(), Value::reference("driver", 42)),
      ("stops".to_owned(), Value::from(vec![1_i64, 2])),
      ("note".to_owned(), Value::from("late")),
    ]));
    assert_eq!(render(&value), r#"{driver: driver#42, note: "late", stops: [1, 2]}"#);
    assert_eq!(render(&Value::Null), "null");
  }
}
