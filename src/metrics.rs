use std::collections::BTreeMap;

use serde_json::Value;

pub type MetricMap = BTreeMap<String, f64>;

/// Metrics that average across periods when aggregating. Everything else sums.
pub const RATE_METRICS: &[&str] = &[
  "frequency",
  "ctr",
  "view_rate",
  "purchase_rate",
  "add_to_cart_rate",
  "checkout_rate",
];

pub const ENGAGEMENT_ACTION_TYPES: &[&str] = &[
  "post_engagement",
  "post_reactions",
  "post_comments",
  "post_shares",
  "page_engagement",
];

pub const VIDEO_COMPLETION_THRESHOLDS: &[u32] = &[25, 50, 75, 95, 100];

fn value_f64(value: &Value) -> Option<f64> {
  value
    .as_f64()
    .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Numeric field lookup. The API serializes most numbers as strings, so both
/// JSON numbers and numeric strings coerce; anything else reads as 0.
pub fn metric_f64(data: &Value, key: &str) -> f64 {
  data.get(key).and_then(value_f64).unwrap_or(0.0)
}

/// First value for `action_type` in an `actions`-shaped list of
/// `{action_type, value}` pairs.
pub fn action_value(data: &Value, list_key: &str, action_type: &str) -> f64 {
  data
    .get(list_key)
    .and_then(|v| v.as_array())
    .and_then(|entries| {
      entries
        .iter()
        .find(|e| e.get("action_type").and_then(|v| v.as_str()) == Some(action_type))
    })
    .and_then(|entry| entry.get("value"))
    .and_then(value_f64)
    .unwrap_or(0.0)
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
  if denominator > 0.0 {
    numerator / denominator
  } else {
    0.0
  }
}

pub fn basic_metrics(data: &Value) -> MetricMap {
  let impressions = metric_f64(data, "impressions");
  let reach = metric_f64(data, "reach");
  let clicks = metric_f64(data, "clicks");
  let spend = metric_f64(data, "spend");

  let mut out = MetricMap::new();
  out.insert("frequency".to_string(), ratio(impressions, reach));
  out.insert("ctr".to_string(), ratio(clicks, impressions) * 100.0);
  out.insert("cpc".to_string(), ratio(spend, clicks));
  out.insert("cpm".to_string(), ratio(spend, impressions) * 1000.0);
  out
}

pub fn conversion_metrics(data: &Value) -> MetricMap {
  let impressions = metric_f64(data, "impressions");
  let spend = metric_f64(data, "spend");
  let purchases = action_value(data, "actions", "purchase");
  let adds_to_cart = action_value(data, "actions", "add_to_cart");
  let checkouts = action_value(data, "actions", "initiate_checkout");
  let purchase_value = action_value(data, "action_values", "purchase");

  let mut out = MetricMap::new();
  out.insert("purchase_rate".to_string(), ratio(purchases, impressions) * 100.0);
  out.insert("add_to_cart_rate".to_string(), ratio(adds_to_cart, impressions) * 100.0);
  out.insert("checkout_rate".to_string(), ratio(checkouts, impressions) * 100.0);
  out.insert("cost_per_purchase".to_string(), ratio(spend, purchases));
  out.insert("cost_per_add_to_cart".to_string(), ratio(spend, adds_to_cart));
  out.insert("cost_per_checkout".to_string(), ratio(spend, checkouts));
  out.insert("roas".to_string(), ratio(purchase_value, spend));
  out
}

pub fn video_metrics(data: &Value) -> MetricMap {
  let impressions = metric_f64(data, "impressions");
  let spend = metric_f64(data, "spend");
  let video_plays = metric_f64(data, "video_plays");

  let mut out = MetricMap::new();
  out.insert("view_rate".to_string(), ratio(video_plays, impressions) * 100.0);
  out.insert("cost_per_video_view".to_string(), ratio(spend, video_plays));
  for threshold in VIDEO_COMPLETION_THRESHOLDS {
    let plays_at = metric_f64(data, &format!("video_plays_at_{threshold}_percent"));
    out.insert(
      format!("video_completion_rate_{threshold}"),
      ratio(plays_at, video_plays) * 100.0,
    );
  }
  out
}

pub fn engagement_metrics(data: &Value) -> MetricMap {
  let impressions = metric_f64(data, "impressions");

  let mut out = MetricMap::new();
  for action_type in ENGAGEMENT_ACTION_TYPES {
    let value = metric_f64(data, action_type);
    out.insert(format!("{action_type}_rate"), ratio(value, impressions) * 100.0);
  }
  out
}

/// Sums every metric across the maps, then averages the rate subset.
pub fn aggregate_metrics(metric_maps: &[MetricMap]) -> MetricMap {
  let mut out = MetricMap::new();
  if metric_maps.is_empty() {
    return out;
  }
  for metrics in metric_maps {
    for (key, value) in metrics {
      *out.entry(key.clone()).or_insert(0.0) += value;
    }
  }
  let count = metric_maps.len() as f64;
  for key in RATE_METRICS {
    if let Some(value) = out.get_mut(*key) {
      *value /= count;
    }
  }
  out
}

/// Percent change per metric key in `current`. When the previous value is 0
/// the result is 0 for an unchanged 0 and a flat 100 otherwise — a ceiling,
/// not a true percentage.
pub fn period_over_period_changes(current: &MetricMap, previous: &MetricMap) -> MetricMap {
  let mut out = MetricMap::new();
  for (key, cur) in current {
    let prev = previous.get(key).copied().unwrap_or(0.0);
    let change = if prev != 0.0 {
      (cur - prev) / prev * 100.0
    } else if *cur == 0.0 {
      0.0
    } else {
      100.0
    };
    out.insert(format!("{key}_change"), change);
  }
  out
}
