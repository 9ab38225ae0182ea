use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::FarmRequest;

/// Matches the two hour cadence of the background upload worker.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 7200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub db_path: String,
    pub api_url: Option<String>,
    pub device_id: String,
    pub email: String,
    pub phone_number: String,
    pub sync_interval_secs: u64,
}

impl CollectorConfig {
    /// Creates a config from environment variables, loading `.env` first.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_db_path(None)
    }

    /// Same as [`CollectorConfig::from_env`], but an explicit database path wins
    /// over `FARM_COLLECTOR_DB_PATH`.
    pub fn from_env_with_db_path(db_path: Option<String>) -> Result<Self> {
        dotenv::dotenv().ok();

        let db_path = match db_path {
            Some(path) => path,
            None => std::env::var("FARM_COLLECTOR_DB_PATH")
                .map_err(|_| anyhow!("FARM_COLLECTOR_DB_PATH environment variable is required"))?,
        };

        let api_url = match std::env::var("FARM_COLLECTOR_API_URL") {
            Ok(url) => Some(normalize_api_url(&url)?),
            Err(_) => None,
        };

        let device_id = std::env::var("FARM_COLLECTOR_DEVICE_ID").unwrap_or_else(|_| {
            tracing::warn!("FARM_COLLECTOR_DEVICE_ID environment variable not found, using empty string");
            String::new()
        });

        let sync_interval_secs = match std::env::var("FARM_COLLECTOR_SYNC_INTERVAL_SECS") {
            Ok(value) => value.trim().parse::<u64>().map_err(|e| {
                anyhow!("FARM_COLLECTOR_SYNC_INTERVAL_SECS must be a whole number of seconds: {}", e)
            })?,
            Err(_) => DEFAULT_SYNC_INTERVAL_SECS,
        };

        Ok(CollectorConfig {
            db_path,
            api_url,
            device_id,
            email: std::env::var("FARM_COLLECTOR_EMAIL").unwrap_or_default(),
            phone_number: std::env::var("FARM_COLLECTOR_PHONE").unwrap_or_default(),
            sync_interval_secs,
        })
    }

    /// The remote base URL, required by restore and sync.
    pub fn require_api_url(&self) -> Result<&str> {
        self.api_url
            .as_deref()
            .ok_or_else(|| anyhow!("FARM_COLLECTOR_API_URL environment variable is required for remote operations"))
    }

    pub fn set_api_url(&mut self, url: &str) -> Result<()> {
        self.api_url = Some(normalize_api_url(url)?);
        Ok(())
    }

    pub fn identity(&self) -> FarmRequest {
        FarmRequest {
            device_id: self.device_id.clone(),
            email: self.email.clone(),
            phone_number: self.phone_number.clone(),
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

/// Validates `url` and strips trailing slashes so endpoint paths can be appended.
pub fn normalize_api_url(url: &str) -> Result<String> {
    let trimmed = url.trim();
    url::Url::parse(trimmed).map_err(|e| anyhow!("Invalid API URL {:?}: {}", trimmed, e))?;
    Ok(trimmed.trim_end_matches('/').to_string())
}
