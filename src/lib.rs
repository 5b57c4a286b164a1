pub mod client;
pub mod config;
pub mod export;
pub mod fetchers;
pub mod manager;
pub mod metrics;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
