use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::{BusinessId, StalenessPolicy};
use crate::queue::DEFAULT_PRUNE_AFTER_DAYS;

const APP_DIR: &str = "pos-offline";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  /// Business used when none is given on the command line
  pub default_business_id: Option<BusinessId>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub queue: QueueConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the POS API, e.g. https://pos.example.com/api
  pub url: String,
  /// Bound on every remote call, connectivity probes included
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Path probed to decide whether the server is reachable
  #[serde(default = "default_health_path")]
  pub health_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Cached data older than this is reported stale. `null` disables it.
  #[serde(default = "default_max_staleness_secs")]
  pub max_staleness_secs: Option<u64>,
  /// Serve stale data (flagged) instead of failing
  #[serde(default = "default_true")]
  pub serve_stale: bool,
  /// Database file (defaults to the platform data directory)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_staleness_secs: default_max_staleness_secs(),
      serve_stale: true,
      path: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
  /// Synced orders are pruned after this many days
  #[serde(default = "default_prune_after_days")]
  pub prune_after_days: i64,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      prune_after_days: default_prune_after_days(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  10
}

fn default_health_path() -> String {
  "/health".to_string()
}

fn default_max_staleness_secs() -> Option<u64> {
  Some(StalenessPolicy::DEFAULT_MAX_STALENESS_SECS as u64)
}

fn default_true() -> bool {
  true
}

fn default_prune_after_days() -> i64 {
  DEFAULT_PRUNE_AFTER_DAYS
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./pos-offline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/pos-offline/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/{}/config.yaml",
        APP_DIR
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from(format!("{}.yaml", APP_DIR));
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_DIR).join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.api_url()?;
    Ok(config)
  }

  /// Get the POS API token from environment variables.
  ///
  /// Checks POS_OFFLINE_API_TOKEN first, then POS_API_TOKEN as fallback.
  /// Requests are sent unauthenticated when neither is set.
  pub fn get_api_token() -> Option<String> {
    std::env::var("POS_OFFLINE_API_TOKEN")
      .or_else(|_| std::env::var("POS_API_TOKEN"))
      .ok()
      .filter(|token| !token.is_empty())
  }

  pub fn api_url(&self) -> Result<Url> {
    Url::parse(&self.api.url).map_err(|e| eyre!("Invalid API URL '{}': {}", self.api.url, e))
  }

  /// Health endpoint, resolved against the API URL's origin.
  pub fn health_url(&self) -> Result<Url> {
    self
      .api_url()?
      .join(&self.api.health_path)
      .map_err(|e| eyre!("Invalid health path '{}': {}", self.api.health_path, e))
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.api.timeout_secs)
  }

  pub fn staleness_policy(&self) -> StalenessPolicy {
    StalenessPolicy {
      max_staleness: self
        .cache
        .max_staleness_secs
        .map(|secs| chrono::Duration::seconds(secs as i64)),
      serve_stale: self.cache.serve_stale,
    }
  }

  pub fn prune_after(&self) -> chrono::Duration {
    chrono::Duration::days(self.queue.prune_after_days)
  }
}

/// Directory holding the database and log files.
pub fn data_dir() -> Result<PathBuf> {
  let base = dirs::data_dir().ok_or_else(|| eyre!("Could not determine data directory"))?;
  Ok(base.join(APP_DIR))
}
