use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use http_body_util::{BodyExt, Full};
use hyper::header::{ACCEPT, CONTENT_TYPE};
use hyper::{Method, StatusCode};
use serde_json::{json, Map, Value};
use tokio::time::Instant;

use crate::config::{self, AppConfig};

type HttpsClient = hyper_util::client::legacy::Client<
  hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
  Full<Bytes>,
>;

const ERROR_SNIPPET_CHARS: usize = 500;

#[derive(Debug)]
pub enum ApiError {
  /// HTTP 429 or a rate-limit phrase in the body. Retried with backoff.
  RateLimited { status: u16, message: String },
  /// Any other non-2xx status, network failure, timeout, or malformed
  /// response. Propagates immediately.
  Request { status: Option<u16>, message: String },
}

impl ApiError {
  pub fn is_rate_limited(&self) -> bool {
    matches!(self, ApiError::RateLimited { .. })
  }

  fn request(message: impl Into<String>) -> Self {
    ApiError::Request {
      status: None,
      message: message.into(),
    }
  }
}

impl std::fmt::Display for ApiError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ApiError::RateLimited { status, message } => {
        write!(f, "rate limited (status {status}): {message}")
      }
      ApiError::Request {
        status: Some(status),
        message,
      } => write!(f, "request failed (status {status}): {message}"),
      ApiError::Request { status: None, message } => {
        write!(f, "request failed: {message}")
      }
    }
  }
}

impl std::error::Error for ApiError {}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub initial_delay: Duration,
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      initial_delay: Duration::from_secs(5),
      max_delay: Duration::from_secs(300),
    }
  }
}

impl RetryPolicy {
  /// Delay before the (retry+1)-th reattempt: initial * 2^retry, capped.
  pub fn delay_for(&self, retry: u32) -> Duration {
    let factor = 2u32.saturating_pow(retry);
    self.initial_delay.saturating_mul(factor).min(self.max_delay)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsightLevel {
  Campaign,
  AdSet,
  Ad,
}

impl InsightLevel {
  pub fn as_str(self) -> &'static str {
    match self {
      InsightLevel::Campaign => "campaign",
      InsightLevel::AdSet => "adset",
      InsightLevel::Ad => "ad",
    }
  }
}

fn is_rate_limit_body(body: &str) -> bool {
  let lower = body.to_ascii_lowercase();
  lower.contains("rate limit") || lower.contains("user request limit reached")
}

fn snippet(text: &str) -> String {
  text.chars().take(ERROR_SNIPPET_CHARS).collect()
}

pub fn insights_params(
  fields: &[&str],
  windows: &[&str],
  level: InsightLevel,
  since: NaiveDate,
  until: NaiveDate,
) -> Vec<(String, String)> {
  let windows_json = Value::from(
    windows
      .iter()
      .map(|w| Value::from(*w))
      .collect::<Vec<Value>>(),
  );
  let time_range = json!({
    "since": since.format("%Y-%m-%d").to_string(),
    "until": until.format("%Y-%m-%d").to_string(),
  });
  vec![
    ("level".to_string(), level.as_str().to_string()),
    ("fields".to_string(), fields.join(",")),
    (
      "action_attribution_windows".to_string(),
      windows_json.to_string(),
    ),
    ("time_range".to_string(), time_range.to_string()),
  ]
}

pub struct AdsApiClient {
  access_token: String,
  account_id: String,
  base_url: String,
  http: HttpsClient,
  retry: RetryPolicy,
  min_request_interval: Duration,
  request_timeout: Duration,
  last_request_at: Mutex<Option<Instant>>,
}

impl AdsApiClient {
  pub fn new(config: &AppConfig) -> Result<Self, ApiError> {
    let connector = hyper_rustls::HttpsConnectorBuilder::new()
      .with_native_roots()
      .map_err(|e| ApiError::request(e.to_string()))?
      .https_or_http()
      .enable_http1()
      .build();
    let http = hyper_util::client::legacy::Client::builder(hyper_util::rt::TokioExecutor::new())
      .build(connector);

    Ok(Self {
      access_token: config.access_token.clone(),
      account_id: config::normalize_account_id(&config.account_id),
      base_url: config.base_url.trim_end_matches('/').to_string(),
      http,
      retry: RetryPolicy::default(),
      min_request_interval: Duration::from_secs(1),
      request_timeout: Duration::from_secs(30),
      last_request_at: Mutex::new(None),
    })
  }

  pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn with_min_request_interval(mut self, interval: Duration) -> Self {
    self.min_request_interval = interval;
    self
  }

  pub fn account_id(&self) -> &str {
    &self.account_id
  }

  /// Issues an authenticated call and follows `paging.next` until exhausted,
  /// concatenating the pages' `data` arrays in order. A 2xx object response
  /// without a `data` array comes back as a one-record sequence.
  pub async fn request(
    &self,
    endpoint: &str,
    params: &[(String, String)],
    method: Method,
  ) -> Result<Vec<Value>, ApiError> {
    let first = if method == Method::GET {
      let url = self.build_url(endpoint, params);
      self.fetch_json(Method::GET, &url, None).await?
    } else if method == Method::POST {
      let url = format!("{}/{}", self.base_url, endpoint.trim_matches('/'));
      let body = self.params_as_json(params);
      self.fetch_json(Method::POST, &url, Some(&body)).await?
    } else {
      return Err(ApiError::request(format!("unsupported http method: {method}")));
    };

    if first.get("data").is_none() {
      if first.is_object() {
        return Ok(vec![first]);
      }
      return Err(ApiError::request("response missing data array"));
    }

    let mut all = Vec::new();
    let mut page = first;
    loop {
      if let Some(items) = page.get("data").and_then(|v| v.as_array()) {
        all.extend(items.iter().cloned());
      }
      let next = page
        .pointer("/paging/next")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
      match next {
        Some(next_url) => {
          page = self.fetch_json(Method::GET, &next_url, None).await?;
        }
        None => break,
      }
    }
    log::debug!("{} returned {} records", self.mask_token(endpoint), all.len());
    Ok(all)
  }

  /// Insights for one object over the trailing 90 days, with the attribution
  /// window parameter set selected by name.
  pub async fn get_insights(
    &self,
    object_id: &str,
    fields: &[&str],
    attribution_window: &str,
    level: InsightLevel,
  ) -> Result<Vec<Value>, ApiError> {
    let windows = config::attribution_windows(attribution_window).ok_or_else(|| {
      ApiError::request(format!("unknown attribution window: {attribution_window}"))
    })?;
    let until = Utc::now().date_naive();
    let since = until - chrono::Duration::days(config::INSIGHTS_LOOKBACK_DAYS);
    let params = insights_params(fields, windows, level, since, until);
    self
      .request(&format!("{object_id}/insights"), &params, Method::GET)
      .await
  }

  pub async fn list_entities(
    &self,
    collection: &str,
    fields: &[&str],
  ) -> Result<Vec<Value>, ApiError> {
    let params = vec![
      ("fields".to_string(), fields.join(",")),
      ("limit".to_string(), config::DEFAULT_PAGE_SIZE.to_string()),
    ];
    self
      .request(
        &format!("act_{}/{collection}", self.account_id),
        &params,
        Method::GET,
      )
      .await
  }

  /// Lightweight identity check. Swallows every failure and reports false.
  pub async fn validate_access(&self) -> bool {
    let params = vec![("fields".to_string(), "name".to_string())];
    match self
      .request(&format!("act_{}", self.account_id), &params, Method::GET)
      .await
    {
      Ok(_) => true,
      Err(err) => {
        log::debug!("access validation failed: {err}");
        false
      }
    }
  }

  fn build_url(&self, endpoint: &str, params: &[(String, String)]) -> String {
    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in params {
      query.append_pair(key, value);
    }
    query.append_pair("access_token", &self.access_token);
    format!(
      "{}/{}?{}",
      self.base_url,
      endpoint.trim_matches('/'),
      query.finish()
    )
  }

  fn params_as_json(&self, params: &[(String, String)]) -> Value {
    let mut body = Map::new();
    for (key, value) in params {
      body.insert(key.clone(), Value::from(value.as_str()));
    }
    body.insert("access_token".to_string(), Value::from(self.access_token.as_str()));
    Value::Object(body)
  }

  fn mask_token(&self, text: &str) -> String {
    if self.access_token.is_empty() {
      return text.to_string();
    }
    let encoded: String =
      url::form_urlencoded::byte_serialize(self.access_token.as_bytes()).collect();
    text.replace(&self.access_token, "***").replace(&encoded, "***")
  }

  /// Minimum spacing before every outbound call, pagination included.
  async fn pace(&self) {
    let wait = {
      let last = self.last_request_at.lock().expect("request pacing state poisoned");
      match *last {
        Some(at) => self.min_request_interval.saturating_sub(at.elapsed()),
        None => Duration::ZERO,
      }
    };
    if wait > Duration::ZERO {
      tokio::time::sleep(wait).await;
    }
    let mut last = self.last_request_at.lock().expect("request pacing state poisoned");
    *last = Some(Instant::now());
  }

  async fn fetch_json(
    &self,
    method: Method,
    url: &str,
    body: Option<&Value>,
  ) -> Result<Value, ApiError> {
    let mut retry = 0u32;
    loop {
      self.pace().await;
      log::debug!("{} {}", method, self.mask_token(url));
      match self.execute(method.clone(), url, body).await {
        Ok(value) => return Ok(value),
        Err(err) if err.is_rate_limited() && retry + 1 < self.retry.max_attempts => {
          let delay = self.retry.delay_for(retry);
          log::warn!("rate limited, retrying in {:.1}s: {err}", delay.as_secs_f64());
          tokio::time::sleep(delay).await;
          retry += 1;
        }
        Err(err) => return Err(err),
      }
    }
  }

  async fn execute(
    &self,
    method: Method,
    url: &str,
    body: Option<&Value>,
  ) -> Result<Value, ApiError> {
    let builder = hyper::Request::builder()
      .method(method)
      .uri(url)
      .header(ACCEPT, "application/json");
    let request = match body {
      Some(value) => builder
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(value.to_string()))),
      None => builder.body(Full::new(Bytes::new())),
    }
    .map_err(|e| ApiError::request(self.mask_token(&e.to_string())))?;

    let response = tokio::time::timeout(self.request_timeout, self.http.request(request))
      .await
      .map_err(|_| {
        ApiError::request(format!(
          "request timed out after {}s (url: {})",
          self.request_timeout.as_secs(),
          self.mask_token(url)
        ))
      })?
      .map_err(|e| ApiError::request(self.mask_token(&e.to_string())))?;

    let status = response.status();
    let body_bytes = response
      .into_body()
      .collect()
      .await
      .map_err(|e| ApiError::Request {
        status: Some(status.as_u16()),
        message: self.mask_token(&e.to_string()),
      })?
      .to_bytes();
    let body_text = String::from_utf8_lossy(&body_bytes);

    if status == StatusCode::TOO_MANY_REQUESTS
      || (!status.is_success() && is_rate_limit_body(&body_text))
    {
      return Err(ApiError::RateLimited {
        status: status.as_u16(),
        message: self.mask_token(&snippet(&body_text)),
      });
    }
    if !status.is_success() {
      return Err(ApiError::Request {
        status: Some(status.as_u16()),
        message: format!(
          "{} (url: {})",
          self.mask_token(&snippet(&body_text)),
          self.mask_token(url)
        ),
      });
    }

    serde_json::from_slice::<Value>(&body_bytes).map_err(|e| ApiError::Request {
      status: Some(status.as_u16()),
      message: format!("invalid json response: {e}"),
    })
  }
}
