use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::client::{AdsApiClient, ApiError, InsightLevel};
use crate::config;
use crate::export;
use crate::metrics;
use crate::BoxError;

use super::{
  copy_raw_metrics, entity_field, entity_id, filter_rows_for_range, insert_metrics,
  range_window_key, PerformanceTables, Row,
};

const IDENTITY_INSIGHT_FIELDS: &[&str] = &[
  "adset_name",
  "campaign_id",
  "optimization_goal",
  "billing_event",
];

pub const ADSET_GROUP_COLUMNS: &[&str] = &["adset_id", "adset_name", "campaign_id"];

pub struct AdSetFetcher {
  client: Arc<AdsApiClient>,
}

impl AdSetFetcher {
  pub fn new(client: Arc<AdsApiClient>) -> Self {
    Self { client }
  }

  pub async fn fetch_entities(&self) -> Result<Vec<Value>, ApiError> {
    self.client.list_entities("adsets", config::ADSET_FIELDS).await
  }

  pub async fn fetch_insights(
    &self,
    adset_id: &str,
    attribution_window: &str,
  ) -> Result<Vec<Value>, ApiError> {
    let mut fields: Vec<&str> = Vec::new();
    fields.extend_from_slice(config::COMMON_METRICS);
    fields.extend_from_slice(config::CONVERSION_METRICS);
    fields.extend_from_slice(IDENTITY_INSIGHT_FIELDS);
    self
      .client
      .get_insights(adset_id, &fields, attribution_window, InsightLevel::AdSet)
      .await
  }

  pub async fn process_data(
    &self,
    adsets: &[Value],
    attribution_window: &str,
  ) -> Result<Vec<Row>, ApiError> {
    let mut rows = Vec::new();
    for adset in adsets {
      let Some(adset_id) = entity_id(adset) else {
        continue;
      };
      let targeting = flatten_targeting(adset.get("targeting").unwrap_or(&Value::Null));
      let insights = self.fetch_insights(adset_id, attribution_window).await?;
      for insight in &insights {
        rows.push(build_row(adset_id, adset, &targeting, insight));
      }
    }
    Ok(rows)
  }

  pub async fn get_performance(
    &self,
    date_ranges: &[String],
    attribution_windows: &[String],
  ) -> Result<PerformanceTables, ApiError> {
    let adsets = self.fetch_entities().await?;
    log::info!("fetched {} ad sets", adsets.len());

    let today = Utc::now().date_naive();
    let mut tables = PerformanceTables::new();
    for window in attribution_windows {
      let rows = self.process_data(&adsets, window).await?;
      for range in date_ranges {
        match filter_rows_for_range(&rows, range, today) {
          Some(filtered) => {
            tables.insert(range_window_key(range, window), filtered);
          }
          None => log::warn!("unknown date range {range}, skipping"),
        }
      }
    }
    Ok(tables)
  }

  pub fn export_data(
    &self,
    tables: &PerformanceTables,
    out_dir: &Path,
  ) -> Result<Vec<PathBuf>, BoxError> {
    export::export_entity_tables(tables, out_dir, "adset", ADSET_GROUP_COLUMNS)
  }
}

/// Flattens the nested targeting spec into scalar and list columns.
pub fn flatten_targeting(targeting: &Value) -> Row {
  let mut out = Row::new();
  out.insert(
    "countries".to_string(),
    targeting
      .pointer("/geo_locations/countries")
      .cloned()
      .unwrap_or(Value::Array(Vec::new())),
  );
  out.insert("age_min".to_string(), entity_field(targeting, "age_min"));
  out.insert("age_max".to_string(), entity_field(targeting, "age_max"));
  out.insert(
    "genders".to_string(),
    targeting.get("genders").cloned().unwrap_or(Value::Array(Vec::new())),
  );
  out.insert(
    "custom_audiences".to_string(),
    audience_names(targeting, "custom_audiences"),
  );
  out.insert(
    "excluded_custom_audiences".to_string(),
    audience_names(targeting, "excluded_custom_audiences"),
  );
  for list_key in [
    "publisher_platforms",
    "facebook_positions",
    "instagram_positions",
    "device_platforms",
  ] {
    out.insert(
      list_key.to_string(),
      targeting.get(list_key).cloned().unwrap_or(Value::Array(Vec::new())),
    );
  }
  out
}

fn audience_names(targeting: &Value, key: &str) -> Value {
  let names = targeting
    .get(key)
    .and_then(|v| v.as_array())
    .map(|audiences| {
      audiences
        .iter()
        .filter_map(|audience| audience.get("name").cloned())
        .collect::<Vec<Value>>()
    })
    .unwrap_or_default();
  Value::Array(names)
}

fn build_row(adset_id: &str, adset: &Value, targeting: &Row, insight: &Value) -> Row {
  let mut row = Row::new();
  row.insert("adset_id".to_string(), Value::from(adset_id));
  row.insert("adset_name".to_string(), entity_field(adset, "name"));
  row.insert("campaign_id".to_string(), entity_field(adset, "campaign_id"));
  row.insert("status".to_string(), entity_field(adset, "status"));
  row.insert(
    "optimization_goal".to_string(),
    entity_field(adset, "optimization_goal"),
  );
  row.insert("billing_event".to_string(), entity_field(adset, "billing_event"));
  row.insert("bid_amount".to_string(), entity_field(adset, "bid_amount"));
  row.insert("date".to_string(), entity_field(insight, "date_start"));

  for (key, value) in targeting {
    row.insert(key.clone(), value.clone());
  }
  copy_raw_metrics(insight, config::COMMON_METRICS, &mut row);
  copy_raw_metrics(insight, config::CONVERSION_METRICS, &mut row);
  insert_metrics(&mut row, metrics::basic_metrics(insight));
  insert_metrics(&mut row, metrics::conversion_metrics(insight));
  row
}
