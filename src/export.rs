use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use serde_json::Value;

use crate::fetchers::{PerformanceTables, Row};
use crate::BoxError;

/// Identity columns pinned to the front of every CSV; remaining columns
/// follow alphabetically.
const PREFERRED_COLUMNS: &[&str] = &[
  "ad_id",
  "ad_name",
  "adset_id",
  "adset_name",
  "campaign_id",
  "campaign_name",
  "status",
  "date",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollupPeriod {
  Weekly,
  Monthly,
}

/// Writes one CSV per table, plus weekly/monthly roll-ups when the
/// `lifetime_default` table is present. Returns every path written.
pub fn export_entity_tables(
  tables: &PerformanceTables,
  out_dir: &Path,
  entity: &str,
  group_columns: &[&str],
) -> Result<Vec<PathBuf>, BoxError> {
  std::fs::create_dir_all(out_dir)?;

  let mut written = Vec::new();
  for (key, rows) in tables {
    let path = out_dir.join(format!("{entity}_data_{key}.csv"));
    write_table(&path, rows)?;
    log::info!("exported {}", path.display());
    written.push(path);
  }

  if let Some(daily_rows) = tables.get("lifetime_default") {
    for (period, label) in [(RollupPeriod::Weekly, "weekly"), (RollupPeriod::Monthly, "monthly")] {
      let rolled = rollup(daily_rows, group_columns, period);
      let path = out_dir.join(format!("{entity}_data_{label}_aggregated.csv"));
      write_table(&path, &rolled)?;
      log::info!("exported {}", path.display());
      written.push(path);
    }
  }
  Ok(written)
}

pub fn write_table(path: &Path, rows: &[Row]) -> Result<(), BoxError> {
  let columns = column_order(rows);
  if columns.is_empty() {
    std::fs::write(path, "")?;
    return Ok(());
  }

  let mut writer = csv::Writer::from_path(path)?;
  writer.write_record(&columns)?;
  for row in rows {
    let record: Vec<String> = columns
      .iter()
      .map(|column| cell_text(row.get(column.as_str())))
      .collect();
    writer.write_record(&record)?;
  }
  writer.flush()?;
  Ok(())
}

pub fn column_order(rows: &[Row]) -> Vec<String> {
  let mut keys: BTreeSet<&str> = BTreeSet::new();
  for row in rows {
    for key in row.keys() {
      keys.insert(key.as_str());
    }
  }

  let mut columns = Vec::with_capacity(keys.len());
  for preferred in PREFERRED_COLUMNS {
    if keys.remove(*preferred) {
      columns.push((*preferred).to_string());
    }
  }
  columns.extend(keys.into_iter().map(|k| k.to_string()));
  columns
}

fn cell_text(value: Option<&Value>) -> String {
  match value {
    None | Some(Value::Null) => String::new(),
    Some(Value::String(text)) => text.clone(),
    Some(Value::Number(number)) => number.to_string(),
    Some(Value::Bool(flag)) => flag.to_string(),
    // Lists and nested objects are serialized verbatim.
    Some(other) => other.to_string(),
  }
}

/// Groups daily rows by calendar period plus the identity columns and sums
/// the numeric remainder. `*_id` columns never sum (numeric-looking ids).
pub fn rollup(rows: &[Row], group_columns: &[&str], period: RollupPeriod) -> Vec<Row> {
  let mut groups: std::collections::BTreeMap<Vec<String>, Row> = std::collections::BTreeMap::new();

  for row in rows {
    let Some(date) = row
      .get("date")
      .and_then(|v| v.as_str())
      .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
    else {
      continue;
    };
    let label = period_label(date, period);

    let mut group_key = vec![label.clone()];
    for column in group_columns {
      group_key.push(cell_text(row.get(*column)));
    }

    let entry = groups.entry(group_key).or_insert_with(|| {
      let mut seed = Row::new();
      seed.insert("date".to_string(), Value::from(label.clone()));
      for column in group_columns {
        seed.insert(
          (*column).to_string(),
          row.get(*column).cloned().unwrap_or(Value::Null),
        );
      }
      seed
    });

    for (column, value) in row {
      if column == "date"
        || group_columns.contains(&column.as_str())
        || column.ends_with("_id")
      {
        continue;
      }
      let Some(number) = numeric_value(value) else {
        continue;
      };
      let current = entry.get(column).and_then(numeric_value).unwrap_or(0.0);
      entry.insert(column.clone(), Value::from(current + number));
    }
  }

  groups.into_values().collect()
}

fn period_label(date: NaiveDate, period: RollupPeriod) -> String {
  match period {
    RollupPeriod::Weekly => {
      let monday = date - chrono::Duration::days(date.weekday().num_days_from_monday() as i64);
      monday.format("%Y-%m-%d").to_string()
    }
    RollupPeriod::Monthly => date.format("%Y-%m").to_string(),
  }
}

fn numeric_value(value: &Value) -> Option<f64> {
  value
    .as_f64()
    .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn daily_row(date: &str, campaign_id: &str, name: &str, spend: f64, status: &str) -> Row {
    let mut row = Row::new();
    row.insert("date".to_string(), Value::from(date));
    row.insert("campaign_id".to_string(), Value::from(campaign_id));
    row.insert("campaign_name".to_string(), Value::from(name));
    row.insert("spend".to_string(), json!(spend));
    row.insert("impressions".to_string(), Value::from("1000"));
    row.insert("status".to_string(), Value::from(status));
    row
  }

  #[test]
  fn columns_put_identity_fields_first() {
    let mut row = Row::new();
    row.insert("spend".to_string(), json!(1));
    row.insert("campaign_id".to_string(), Value::from("1"));
    row.insert("date".to_string(), Value::from("2026-08-01"));
    row.insert("ctr".to_string(), json!(2.0));
    let columns = column_order(&[row]);
    assert_eq!(columns, vec!["campaign_id", "date", "ctr", "spend"]);
  }

  #[test]
  fn weekly_rollup_groups_by_iso_week_and_sums_numeric_columns() {
    // 2026-07-29 (Wed) and 2026-07-31 (Fri) share the week of Mon 2026-07-27;
    // 2026-08-04 (Tue) falls into the week of Mon 2026-08-03.
    let rows = vec![
      daily_row("2026-07-29", "c1", "Summer", 10.0, "ACTIVE"),
      daily_row("2026-07-31", "c1", "Summer", 20.0, "ACTIVE"),
      daily_row("2026-08-04", "c1", "Summer", 5.0, "ACTIVE"),
    ];
    let rolled = rollup(&rows, &["campaign_id", "campaign_name"], RollupPeriod::Weekly);
    assert_eq!(rolled.len(), 2);
    assert_eq!(rolled[0]["date"], Value::from("2026-07-27"));
    assert_eq!(rolled[0]["spend"].as_f64().unwrap(), 30.0);
    assert_eq!(rolled[0]["impressions"].as_f64().unwrap(), 2000.0);
    assert_eq!(rolled[1]["date"], Value::from("2026-08-03"));
    assert_eq!(rolled[1]["spend"].as_f64().unwrap(), 5.0);
    // Non-numeric columns drop out of the roll-up.
    assert!(!rolled[0].contains_key("status"));
  }

  #[test]
  fn monthly_rollup_groups_by_month() {
    let rows = vec![
      daily_row("2026-07-29", "c1", "Summer", 10.0, "ACTIVE"),
      daily_row("2026-07-02", "c1", "Summer", 20.0, "ACTIVE"),
      daily_row("2026-08-01", "c1", "Summer", 7.0, "ACTIVE"),
    ];
    let rolled = rollup(&rows, &["campaign_id", "campaign_name"], RollupPeriod::Monthly);
    assert_eq!(rolled.len(), 2);
    assert_eq!(rolled[0]["date"], Value::from("2026-07"));
    assert_eq!(rolled[0]["spend"].as_f64().unwrap(), 30.0);
    assert_eq!(rolled[1]["date"], Value::from("2026-08"));
  }

  #[test]
  fn rollup_keeps_entities_apart_and_never_sums_id_columns() {
    let mut first = daily_row("2026-08-03", "c1", "Summer", 10.0, "ACTIVE");
    first.insert("video_id".to_string(), Value::from("77001"));
    let second = daily_row("2026-08-04", "c2", "Winter", 4.0, "PAUSED");
    let rolled = rollup(
      &[first, second],
      &["campaign_id", "campaign_name"],
      RollupPeriod::Weekly,
    );
    assert_eq!(rolled.len(), 2);
    assert_eq!(rolled[0]["campaign_id"], Value::from("c1"));
    // video_id is not a group column, but id columns are excluded from sums.
    assert_eq!(rolled[0].get("video_id"), None);
    assert_eq!(rolled[1]["campaign_id"], Value::from("c2"));
  }

  #[test]
  fn rollup_ignores_rows_without_parseable_dates() {
    let mut row = Row::new();
    row.insert("campaign_id".to_string(), Value::from("c1"));
    row.insert("spend".to_string(), json!(3.0));
    assert!(rollup(&[row], &["campaign_id"], RollupPeriod::Weekly).is_empty());
  }

  #[test]
  fn tables_write_as_csv_with_ordered_headers() {
    let dir = std::env::temp_dir().join(format!("ad-insights-export-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("campaign_data_lifetime_default.csv");

    let mut row = Row::new();
    row.insert("campaign_id".to_string(), Value::from("c1"));
    row.insert("date".to_string(), Value::from("2026-08-01"));
    row.insert("spend".to_string(), Value::from("25.5"));
    row.insert("genders".to_string(), json!([1]));
    write_table(&path, &[row]).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next().unwrap(), "campaign_id,date,genders,spend");
    assert_eq!(lines.next().unwrap(), "c1,2026-08-01,[1],25.5");
    std::fs::remove_dir_all(&dir).ok();
  }

  #[test]
  fn empty_tables_still_produce_a_file() {
    let dir = std::env::temp_dir().join(format!("ad-insights-export-empty-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("empty.csv");
    write_table(&path, &[]).unwrap();
    assert!(path.exists());
    std::fs::remove_dir_all(&dir).ok();
  }
}
