pub mod ads;
pub mod adsets;
pub mod campaigns;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde_json::Value;

use crate::config::{self, DateRange};

/// One flattened export row. Dynamic columns: entity attributes, raw insight
/// fields, and derived metrics all land in the same map.
pub type Row = BTreeMap<String, Value>;

/// Tables keyed `"{date_range}_{attribution_window}"`.
pub type PerformanceTables = BTreeMap<String, Vec<Row>>;

pub fn range_window_key(date_range: &str, window: &str) -> String {
  format!("{date_range}_{window}")
}

pub(crate) fn entity_field(entity: &Value, key: &str) -> Value {
  entity.get(key).cloned().unwrap_or(Value::Null)
}

pub(crate) fn entity_id(entity: &Value) -> Option<&str> {
  entity.get("id").and_then(|v| v.as_str())
}

/// Copies the raw insight fields for the configured metric list into the row,
/// defaulting absent fields to 0 so every table carries the same columns.
pub(crate) fn copy_raw_metrics(insight: &Value, keys: &[&str], row: &mut Row) {
  for key in keys {
    let value = insight.get(*key).cloned().unwrap_or(Value::from(0));
    row.insert((*key).to_string(), value);
  }
}

pub(crate) fn insert_metrics(row: &mut Row, metrics: crate::metrics::MetricMap) {
  for (key, value) in metrics {
    row.insert(key, Value::from(value));
  }
}

/// Applies a named date range to already-processed rows. Lifetime keeps
/// everything; trailing ranges keep rows dated within the last N days.
/// Returns None for an unknown range name.
pub(crate) fn filter_rows_for_range(rows: &[Row], range: &str, today: NaiveDate) -> Option<Vec<Row>> {
  match config::date_range(range)? {
    DateRange::Lifetime => Some(rows.to_vec()),
    DateRange::TrailingDays(days) => {
      let cutoff = (today - chrono::Duration::days(days))
        .format("%Y-%m-%d")
        .to_string();
      Some(
        rows
          .iter()
          .filter(|row| {
            row
              .get("date")
              .and_then(|v| v.as_str())
              .map(|date| date >= cutoff.as_str())
              .unwrap_or(false)
          })
          .cloned()
          .collect(),
      )
    }
  }
}
