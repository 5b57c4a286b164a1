use std::path::PathBuf;

pub const API_VERSION: &str = "v18.0";
pub const DEFAULT_BASE_URL: &str = "https://graph.facebook.com/v18.0";
pub const DEFAULT_PAGE_SIZE: u32 = 500;
pub const INSIGHTS_LOOKBACK_DAYS: i64 = 90;

pub const ACCESS_TOKEN_ENV: &str = "FACEBOOK_ACCESS_TOKEN";
pub const ACCOUNT_ID_ENV: &str = "FACEBOOK_AD_ACCOUNT_ID";

pub const CAMPAIGN_FIELDS: &[&str] = &[
  "id",
  "name",
  "objective",
  "buying_type",
  "status",
  "start_time",
  "stop_time",
  "daily_budget",
  "lifetime_budget",
  "bid_strategy",
  "special_ad_categories",
];

pub const ADSET_FIELDS: &[&str] = &[
  "id",
  "name",
  "campaign_id",
  "status",
  "targeting",
  "optimization_goal",
  "billing_event",
  "bid_amount",
  "budget_remaining",
  "daily_budget",
  "lifetime_budget",
  "attribution_spec",
  "start_time",
  "end_time",
];

pub const AD_FIELDS: &[&str] = &[
  "id",
  "name",
  "adset_id",
  "campaign_id",
  "status",
  "creative",
  "tracking_specs",
  "conversion_specs",
  "created_time",
  "updated_time",
];

pub const CREATIVE_FIELDS: &[&str] = &[
  "id",
  "name",
  "title",
  "body",
  "object_story_spec",
  "image_url",
  "video_id",
  "call_to_action_type",
  "link_url",
  "thumbnail_url",
  "image_hash",
  "platform_customizations",
];

pub const COMMON_METRICS: &[&str] = &[
  "spend",
  "impressions",
  "reach",
  "clicks",
  "unique_clicks",
  "inline_link_clicks",
  "unique_inline_link_clicks",
  "cpc",
  "cpm",
  "ctr",
];

pub const CONVERSION_METRICS: &[&str] = &[
  "actions",
  "action_values",
  "cost_per_action_type",
  "cost_per_unique_action_type",
  "unique_actions",
  "website_purchases",
  "website_adds_to_cart",
  "website_checkouts_initiated",
];

pub const VIDEO_METRICS: &[&str] = &[
  "video_p25_watched_actions",
  "video_p50_watched_actions",
  "video_p75_watched_actions",
  "video_p95_watched_actions",
  "video_p100_watched_actions",
  "video_avg_time_watched_actions",
  "video_continuous_2_sec_watched_actions",
  "video_30_sec_watched_actions",
];

pub const ENGAGEMENT_METRICS: &[&str] = &[
  "post_engagement",
  "post_reactions",
  "post_comments",
  "post_shares",
  "page_engagement",
];

// Breakdown dimensions the insights endpoint accepts. Available to callers,
// not exercised by the default export flow.
pub const TIME_BREAKDOWNS: &[&str] = &["day", "week", "month"];
pub const DEMOGRAPHIC_BREAKDOWNS: &[&str] = &["age", "gender", "country"];
pub const PLACEMENT_BREAKDOWNS: &[&str] = &["publisher_platform", "platform_position"];

pub const DEFAULT_DATE_RANGES: &[&str] = &["7_days", "28_days", "lifetime"];
pub const DEFAULT_ATTRIBUTION_WINDOWS: &[&str] = &["1d_click", "7d_click", "default"];

/// Attribution window parameter sets, selected by name. The remote service
/// applies the attribution rule; this side only submits the window list.
pub fn attribution_windows(name: &str) -> Option<&'static [&'static str]> {
  match name {
    "1d_click" => Some(&["1d_click"]),
    "7d_click" => Some(&["7d_click"]),
    "28d_click" => Some(&["28d_click"]),
    "1d_view" => Some(&["1d_view"]),
    "7d_view" => Some(&["7d_view"]),
    "default" => Some(&["7d_click", "1d_view"]),
    _ => None,
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateRange {
  Lifetime,
  TrailingDays(i64),
}

pub fn date_range(name: &str) -> Option<DateRange> {
  match name {
    "1_day" => Some(DateRange::TrailingDays(1)),
    "7_days" => Some(DateRange::TrailingDays(7)),
    "28_days" => Some(DateRange::TrailingDays(28)),
    "90_days" => Some(DateRange::TrailingDays(90)),
    "lifetime" => Some(DateRange::Lifetime),
    _ => None,
  }
}

#[derive(Debug)]
pub struct ConfigError {
  pub message: String,
}

impl ConfigError {
  fn missing_env(name: &str) -> Self {
    Self {
      message: format!("missing required environment variable {name}"),
    }
  }
}

impl std::fmt::Display for ConfigError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "configuration error: {}", self.message)
  }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub access_token: String,
  pub account_id: String,
  pub base_url: String,
  pub export_dir: PathBuf,
}

impl AppConfig {
  /// Reads the two required secrets eagerly, before any network call.
  pub fn from_env(export_dir: PathBuf) -> Result<Self, ConfigError> {
    let access_token = require_env(ACCESS_TOKEN_ENV)?;
    let account_id = require_env(ACCOUNT_ID_ENV)?;
    Ok(Self {
      access_token,
      account_id: normalize_account_id(&account_id),
      base_url: DEFAULT_BASE_URL.to_string(),
      export_dir,
    })
  }

  pub fn campaign_export_dir(&self) -> PathBuf {
    self.export_dir.join("campaigns")
  }

  pub fn adset_export_dir(&self) -> PathBuf {
    self.export_dir.join("adsets")
  }

  pub fn ad_export_dir(&self) -> PathBuf {
    self.export_dir.join("ads")
  }

  pub fn report_path(&self) -> PathBuf {
    self.export_dir.join("fetch_report.txt")
  }

  pub fn export_dirs(&self) -> [PathBuf; 4] {
    [
      self.export_dir.clone(),
      self.campaign_export_dir(),
      self.adset_export_dir(),
      self.ad_export_dir(),
    ]
  }
}

pub fn normalize_account_id(raw: &str) -> String {
  raw.trim().trim_start_matches("act_").to_string()
}

fn require_env(name: &'static str) -> Result<String, ConfigError> {
  match std::env::var(name) {
    Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
    _ => Err(ConfigError::missing_env(name)),
  }
}

pub fn ensure_dirs(dirs: &[PathBuf]) -> std::io::Result<()> {
  for dir in dirs {
    std::fs::create_dir_all(dir)?;
  }
  Ok(())
}
