use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use hyper::Method;
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

pub const AD_GROUP_COLUMNS: &[&str] = &["ad_id", "ad_name", "adset_id", "campaign_id"];

pub struct AdFetcher {
  client: Arc<AdsApiClient>,
  // One creative lookup per distinct creative id per run; repeat windows and
  // ranges reuse the flattened result.
  creative_cache: HashMap<String, Row>,
}

impl AdFetcher {
  pub fn new(client: Arc<AdsApiClient>) -> Self {
    Self {
      client,
      creative_cache: HashMap::new(),
    }
  }

  pub async fn fetch_entities(&self) -> Result<Vec<Value>, ApiError> {
    self.client.list_entities("ads", config::AD_FIELDS).await
  }

  pub async fn fetch_insights(
    &self,
    ad_id: &str,
    attribution_window: &str,
  ) -> Result<Vec<Value>, ApiError> {
    let mut fields: Vec<&str> = Vec::new();
    fields.extend_from_slice(config::COMMON_METRICS);
    fields.extend_from_slice(config::CONVERSION_METRICS);
    fields.extend_from_slice(config::VIDEO_METRICS);
    fields.extend_from_slice(config::ENGAGEMENT_METRICS);
    self
      .client
      .get_insights(ad_id, &fields, attribution_window, InsightLevel::Ad)
      .await
  }

  async fn creative_details(&mut self, creative_id: &str) -> Result<Row, ApiError> {
    if let Some(cached) = self.creative_cache.get(creative_id) {
      return Ok(cached.clone());
    }
    let params = vec![(
      "fields".to_string(),
      config::CREATIVE_FIELDS.join(","),
    )];
    let records = self.client.request(creative_id, &params, Method::GET).await?;
    let flattened = records.first().map(flatten_creative).unwrap_or_default();
    self
      .creative_cache
      .insert(creative_id.to_string(), flattened.clone());
    Ok(flattened)
  }

  pub async fn process_data(
    &mut self,
    ads: &[Value],
    attribution_window: &str,
  ) -> Result<Vec<Row>, ApiError> {
    let mut rows = Vec::new();
    for ad in ads {
      let Some(ad_id) = entity_id(ad) else {
        continue;
      };
      let creative = match ad.pointer("/creative/id").and_then(|v| v.as_str()) {
        Some(creative_id) => {
          let creative_id = creative_id.to_string();
          self.creative_details(&creative_id).await?
        }
        None => Row::new(),
      };
      let insights = self.fetch_insights(ad_id, attribution_window).await?;
      for insight in &insights {
        rows.push(build_row(ad_id, ad, &creative, insight));
      }
    }
    Ok(rows)
  }

  pub async fn get_performance(
    &mut self,
    date_ranges: &[String],
    attribution_windows: &[String],
  ) -> Result<PerformanceTables, ApiError> {
    let ads = self.fetch_entities().await?;
    log::info!("fetched {} ads", ads.len());

    let today = Utc::now().date_naive();
    let mut tables = PerformanceTables::new();
    for window in attribution_windows {
      let rows = self.process_data(&ads, window).await?;
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
    export::export_entity_tables(tables, out_dir, "ad", AD_GROUP_COLUMNS)
  }
}

/// Flattens a creative object; each platform customization block becomes one
/// JSON-serialized `{platform}_customization` column.
pub fn flatten_creative(creative: &Value) -> Row {
  let mut out = Row::new();
  out.insert("creative_id".to_string(), entity_field(creative, "id"));
  out.insert("creative_name".to_string(), entity_field(creative, "name"));
  out.insert("body".to_string(), entity_field(creative, "body"));
  out.insert("title".to_string(), entity_field(creative, "title"));
  out.insert(
    "call_to_action_type".to_string(),
    entity_field(creative, "call_to_action_type"),
  );
  out.insert("link_url".to_string(), entity_field(creative, "link_url"));
  out.insert("image_url".to_string(), entity_field(creative, "image_url"));
  out.insert("video_id".to_string(), entity_field(creative, "video_id"));

  if let Some(customizations) = creative
    .get("platform_customizations")
    .and_then(|v| v.as_object())
  {
    for (platform, settings) in customizations {
      out.insert(
        format!("{platform}_customization"),
        Value::from(settings.to_string()),
      );
    }
  }
  out
}

fn build_row(ad_id: &str, ad: &Value, creative: &Row, insight: &Value) -> Row {
  let mut row = Row::new();
  row.insert("ad_id".to_string(), Value::from(ad_id));
  row.insert("ad_name".to_string(), entity_field(ad, "name"));
  row.insert("adset_id".to_string(), entity_field(ad, "adset_id"));
  row.insert("campaign_id".to_string(), entity_field(ad, "campaign_id"));
  row.insert("status".to_string(), entity_field(ad, "status"));
  row.insert("date".to_string(), entity_field(insight, "date_start"));

  for (key, value) in creative {
    row.insert(key.clone(), value.clone());
  }
  copy_raw_metrics(insight, config::COMMON_METRICS, &mut row);
  copy_raw_metrics(insight, config::CONVERSION_METRICS, &mut row);
  copy_raw_metrics(insight, config::VIDEO_METRICS, &mut row);
  copy_raw_metrics(insight, config::ENGAGEMENT_METRICS, &mut row);
  insert_metrics(&mut row, metrics::basic_metrics(insight));
  insert_metrics(&mut row, metrics::conversion_metrics(insight));
  insert_metrics(&mut row, metrics::video_metrics(insight));
  insert_metrics(&mut row, metrics::engagement_metrics(insight));
  row
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;
  use bytes::Bytes;
  use http_body_util::Full;
  use hyper::body::Incoming;
  use hyper::server::conn::http1;
  use hyper::service::service_fn;
  use hyper::{Request, Response, StatusCode};
  use hyper_util::rt::TokioIo;
  use serde_json::json;
  use tokio::net::TcpListener;

  use crate::client::RetryPolicy;
  use crate::config::AppConfig;

  #[test]
  fn creative_flattens_references_and_platform_customizations() {
    let creative = json!({
      "id": "23843",
      "name": "Blue Hero",
      "body": "Shop the drop",
      "title": "New arrivals",
      "call_to_action_type": "SHOP_NOW",
      "link_url": "https://example.com/drop",
      "image_url": "https://cdn.example.com/hero.jpg",
      "video_id": "77001",
      "platform_customizations": {
        "instagram": {"image_url": "https://cdn.example.com/ig.jpg"},
        "facebook": {"image_crops": {"191x100": [[0, 0], [1600, 838]]}}
      }
    });
    let flat = flatten_creative(&creative);
    assert_eq!(flat["creative_id"], Value::from("23843"));
    assert_eq!(flat["call_to_action_type"], Value::from("SHOP_NOW"));
    let instagram = flat["instagram_customization"].as_str().unwrap();
    assert_eq!(instagram, r#"{"image_url":"https://cdn.example.com/ig.jpg"}"#);
    assert!(flat.contains_key("facebook_customization"));
  }

  #[test]
  fn empty_creative_still_produces_reference_columns() {
    let flat = flatten_creative(&json!({}));
    assert_eq!(flat["creative_id"], Value::Null);
    assert_eq!(flat["video_id"], Value::Null);
    assert!(!flat.contains_key("instagram_customization"));
  }

  #[test]
  fn ad_rows_merge_creative_raw_fields_and_all_metric_groups() {
    let ad = json!({
      "id": "9001",
      "name": "Hero ad",
      "adset_id": "800",
      "campaign_id": "120001",
      "status": "ACTIVE",
      "creative": {"id": "23843"},
    });
    let creative = flatten_creative(&json!({"id": "23843", "name": "Blue Hero"}));
    let insight = json!({
      "date_start": "2026-08-01",
      "impressions": 1000,
      "clicks": 50,
      "spend": 25,
      "video_plays": 200,
      "post_engagement": 30,
    });

    let row = build_row("9001", &ad, &creative, &insight);
    assert_eq!(row["ad_id"], Value::from("9001"));
    assert_eq!(row["creative_name"], Value::from("Blue Hero"));
    assert_eq!(row["ctr"].as_f64().unwrap(), 5.0);
    assert_eq!(row["view_rate"].as_f64().unwrap(), 20.0);
    assert_eq!(row["post_engagement_rate"].as_f64().unwrap(), 3.0);
    // Raw fields default to 0 when the payload omits them.
    assert_eq!(row["video_p25_watched_actions"], Value::from(0));
  }

  fn routed_body(path: &str) -> &'static str {
    if path == "/act_123/ads" {
      return r#"{"data":[{"id":"9001","name":"Hero ad","adset_id":"800","campaign_id":"120001","status":"ACTIVE","creative":{"id":"23843"}}]}"#;
    }
    if path == "/23843" {
      return r#"{"id":"23843","name":"Blue Hero","title":"New arrivals","call_to_action_type":"SHOP_NOW"}"#;
    }
    if path == "/9001/insights" {
      return r#"{"data":[{"date_start":"2026-08-01","impressions":"1000","clicks":"50","spend":"25"}]}"#;
    }
    r#"{"error":{"message":"unknown path"}}"#
  }

  async fn serve_routed(listener: TcpListener, creative_hits: Arc<AtomicUsize>) {
    loop {
      let Ok((stream, _)) = listener.accept().await else {
        return;
      };
      let io = TokioIo::new(stream);
      let creative_hits = creative_hits.clone();
      let service = service_fn(move |req: Request<Incoming>| {
        let path = req.uri().path().to_string();
        if path == "/23843" {
          creative_hits.fetch_add(1, Ordering::SeqCst);
        }
        async move {
          let body = routed_body(&path);
          let status = if body.contains("unknown path") {
            StatusCode::NOT_FOUND
          } else {
            StatusCode::OK
          };
          Ok::<_, hyper::Error>(
            Response::builder()
              .status(status)
              .header("content-type", "application/json")
              .body(Full::new(Bytes::from(body)))
              .unwrap(),
          )
        }
      });
      tokio::spawn(async move {
        let _ = http1::Builder::new().serve_connection(io, service).await;
      });
    }
  }

  #[tokio::test]
  async fn creative_lookups_are_cached_across_processing_passes() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let creative_hits = Arc::new(AtomicUsize::new(0));
    tokio::spawn(serve_routed(listener, creative_hits.clone()));

    let config = AppConfig {
      access_token: "token123".to_string(),
      account_id: "123".to_string(),
      base_url: format!("http://{addr}"),
      export_dir: std::path::PathBuf::from("exports"),
    };
    let client = Arc::new(
      AdsApiClient::new(&config)
        .unwrap()
        .with_min_request_interval(Duration::ZERO)
        .with_retry_policy(RetryPolicy {
          max_attempts: 2,
          initial_delay: Duration::from_millis(10),
          max_delay: Duration::from_millis(50),
        }),
    );
    let mut fetcher = AdFetcher::new(client);

    let ads = fetcher.fetch_entities().await.unwrap();
    let first_pass = fetcher.process_data(&ads, "default").await.unwrap();
    let second_pass = fetcher.process_data(&ads, "1d_click").await.unwrap();

    assert_eq!(first_pass.len(), 1);
    assert_eq!(second_pass.len(), 1);
    assert_eq!(first_pass[0]["creative_name"], Value::from("Blue Hero"));
    assert_eq!(creative_hits.load(Ordering::SeqCst), 1);
  }
}
