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

const IDENTITY_INSIGHT_FIELDS: &[&str] = &["campaign_name", "objective", "buying_type"];

pub const CAMPAIGN_GROUP_COLUMNS: &[&str] = &["campaign_id", "campaign_name"];

pub struct CampaignFetcher {
  client: Arc<AdsApiClient>,
}

impl CampaignFetcher {
  pub fn new(client: Arc<AdsApiClient>) -> Self {
    Self { client }
  }

  pub async fn fetch_entities(&self) -> Result<Vec<Value>, ApiError> {
    self
      .client
      .list_entities("campaigns", config::CAMPAIGN_FIELDS)
      .await
  }

  pub async fn fetch_insights(
    &self,
    campaign_id: &str,
    attribution_window: &str,
  ) -> Result<Vec<Value>, ApiError> {
    let mut fields: Vec<&str> = Vec::new();
    fields.extend_from_slice(config::COMMON_METRICS);
    fields.extend_from_slice(config::CONVERSION_METRICS);
    fields.extend_from_slice(IDENTITY_INSIGHT_FIELDS);
    self
      .client
      .get_insights(campaign_id, &fields, attribution_window, InsightLevel::Campaign)
      .await
  }

  pub async fn process_data(
    &self,
    campaigns: &[Value],
    attribution_window: &str,
  ) -> Result<Vec<Row>, ApiError> {
    let mut rows = Vec::new();
    for campaign in campaigns {
      let Some(campaign_id) = entity_id(campaign) else {
        continue;
      };
      let insights = self.fetch_insights(campaign_id, attribution_window).await?;
      for insight in &insights {
        rows.push(build_row(campaign_id, campaign, insight));
      }
    }
    Ok(rows)
  }

  pub async fn get_performance(
    &self,
    date_ranges: &[String],
    attribution_windows: &[String],
  ) -> Result<PerformanceTables, ApiError> {
    let campaigns = self.fetch_entities().await?;
    log::info!("fetched {} campaigns", campaigns.len());

    let today = Utc::now().date_naive();
    let mut tables = PerformanceTables::new();
    for window in attribution_windows {
      let rows = self.process_data(&campaigns, window).await?;
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
    export::export_entity_tables(tables, out_dir, "campaign", CAMPAIGN_GROUP_COLUMNS)
  }
}

fn build_row(campaign_id: &str, campaign: &Value, insight: &Value) -> Row {
  let mut row = Row::new();
  row.insert("campaign_id".to_string(), Value::from(campaign_id));
  row.insert("campaign_name".to_string(), entity_field(campaign, "name"));
  row.insert("objective".to_string(), entity_field(campaign, "objective"));
  row.insert("buying_type".to_string(), entity_field(campaign, "buying_type"));
  row.insert("status".to_string(), entity_field(campaign, "status"));
  row.insert("date".to_string(), entity_field(insight, "date_start"));

  copy_raw_metrics(insight, config::COMMON_METRICS, &mut row);
  copy_raw_metrics(insight, config::CONVERSION_METRICS, &mut row);
  insert_metrics(&mut row, metrics::basic_metrics(insight));
  insert_metrics(&mut row, metrics::conversion_metrics(insight));
  row
}
