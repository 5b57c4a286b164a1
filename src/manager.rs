use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::client::{AdsApiClient, ApiError};
use crate::config::AppConfig;
use crate::fetchers::ads::AdFetcher;
use crate::fetchers::adsets::AdSetFetcher;
use crate::fetchers::campaigns::CampaignFetcher;
use crate::BoxError;

/// Spacing between entity types so the three fetch passes don't burst the
/// remote rate limit back to back.
pub const ENTITY_TYPE_PAUSE: Duration = Duration::from_secs(5);

pub struct DataManager {
  config: AppConfig,
  client: Arc<AdsApiClient>,
  campaigns: CampaignFetcher,
  adsets: AdSetFetcher,
  ads: AdFetcher,
  entity_pause: Duration,
}

impl DataManager {
  pub fn new(config: AppConfig) -> Result<Self, ApiError> {
    let client = Arc::new(AdsApiClient::new(&config)?);
    Ok(Self::with_client(config, client))
  }

  pub fn with_client(config: AppConfig, client: Arc<AdsApiClient>) -> Self {
    Self {
      campaigns: CampaignFetcher::new(client.clone()),
      adsets: AdSetFetcher::new(client.clone()),
      ads: AdFetcher::new(client.clone()),
      client,
      config,
      entity_pause: ENTITY_TYPE_PAUSE,
    }
  }

  pub fn with_entity_pause(mut self, pause: Duration) -> Self {
    self.entity_pause = pause;
    self
  }

  pub fn client(&self) -> &AdsApiClient {
    &self.client
  }

  /// Runs the whole export: campaigns, ad sets, ads, then the run report.
  /// Any unrecovered error fails the run; files already written stay on disk.
  pub async fn fetch_all(
    &mut self,
    date_ranges: &[String],
    attribution_windows: &[String],
  ) -> Result<Vec<PathBuf>, BoxError> {
    crate::config::ensure_dirs(&self.config.export_dirs())?;

    let mut written = Vec::new();
    match self
      .run_stages(date_ranges, attribution_windows, &mut written)
      .await
    {
      Ok(()) => {}
      Err(err) => {
        log::error!("data fetch failed: {err}");
        return Err(err);
      }
    }

    self.write_report(&written)?;
    log::info!("data fetch completed, {} files written", written.len());
    Ok(written)
  }

  async fn run_stages(
    &mut self,
    date_ranges: &[String],
    attribution_windows: &[String],
    written: &mut Vec<PathBuf>,
  ) -> Result<(), BoxError> {
    log::info!("fetching campaign data");
    let tables = self
      .campaigns
      .get_performance(date_ranges, attribution_windows)
      .await?;
    written.extend(
      self
        .campaigns
        .export_data(&tables, &self.config.campaign_export_dir())?,
    );
    tokio::time::sleep(self.entity_pause).await;

    log::info!("fetching ad set data");
    let tables = self
      .adsets
      .get_performance(date_ranges, attribution_windows)
      .await?;
    written.extend(
      self
        .adsets
        .export_data(&tables, &self.config.adset_export_dir())?,
    );
    tokio::time::sleep(self.entity_pause).await;

    log::info!("fetching ad data");
    let tables = self
      .ads
      .get_performance(date_ranges, attribution_windows)
      .await?;
    written.extend(self.ads.export_data(&tables, &self.config.ad_export_dir())?);

    Ok(())
  }

  fn write_report(&self, files: &[PathBuf]) -> Result<(), BoxError> {
    let path = self.config.report_path();
    let mut text = String::new();
    text.push_str("Ads Data Fetch Report\n");
    text.push_str(&format!(
      "Generated at: {}\n\n",
      Utc::now().format("%Y-%m-%d %H:%M:%S")
    ));
    text.push_str(&format!("Files generated ({}):\n", files.len()));
    for file in files {
      text.push_str(&format!("- {}\n", file.display()));
    }
    std::fs::write(&path, text)?;
    log::info!("wrote run report {}", path.display());
    Ok(())
  }
}
