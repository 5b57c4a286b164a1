use std::path::PathBuf;

use ad_insights_export::config::{self, AppConfig};
use ad_insights_export::manager::DataManager;
use ad_insights_export::BoxError;

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
  args
    .iter()
    .position(|a| a == flag)
    .and_then(|idx| args.get(idx + 1))
    .cloned()
}

fn parse_list(value: &str) -> Vec<String> {
  value
    .split(',')
    .map(|part| part.trim().to_string())
    .filter(|part| !part.is_empty())
    .collect()
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
  simple_logger::init_with_level(log::Level::Info)?;

  let args: Vec<String> = std::env::args().collect();
  let out_dir = parse_flag_value(&args, "--out-dir")
    .map(PathBuf::from)
    .unwrap_or_else(|| PathBuf::from("exports"));
  let date_ranges = parse_flag_value(&args, "--date-ranges")
    .map(|v| parse_list(&v))
    .unwrap_or_else(|| config::DEFAULT_DATE_RANGES.iter().map(|s| s.to_string()).collect());
  let attribution_windows = parse_flag_value(&args, "--windows")
    .map(|v| parse_list(&v))
    .unwrap_or_else(|| {
      config::DEFAULT_ATTRIBUTION_WINDOWS
        .iter()
        .map(|s| s.to_string())
        .collect()
    });

  // Credentials are checked before any network call.
  let config = AppConfig::from_env(out_dir)?;
  let mut manager = DataManager::new(config)?;

  if !manager.client().validate_access().await {
    log::warn!("credential check failed; continuing with the configured token");
  }

  let written = manager.fetch_all(&date_ranges, &attribution_windows).await?;
  log::info!("wrote {} files", written.len());
  Ok(())
}
