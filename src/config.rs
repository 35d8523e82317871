use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `api.url`.
pub const API_URL_ENV: &str = "TASKLINK_API_URL";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub queue: QueueConfig,
  #[serde(default)]
  pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL every request path is appended to
  #[serde(default = "default_api_url")]
  pub url: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: default_api_url(),
    }
  }
}

fn default_api_url() -> String {
  "http://127.0.0.1:5000/api".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
  /// Hard timeout for a single attempt
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
  /// Backoff before attempt k+1 is `base_delay_ms * k`
  #[serde(default = "default_base_delay_ms")]
  pub base_delay_ms: u64,
  /// A logical call still running after this long marks the connection slow
  #[serde(default = "default_slow_threshold_ms")]
  pub slow_threshold_ms: u64,
  /// Retry (and queue for replay) 4xx responses like any other failure
  #[serde(default = "default_true")]
  pub retry_client_errors: bool,
}

fn default_timeout_ms() -> u64 {
  15_000
}

fn default_max_attempts() -> u32 {
  3
}

fn default_base_delay_ms() -> u64 {
  2_000
}

fn default_slow_threshold_ms() -> u64 {
  5_000
}

fn default_true() -> bool {
  true
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      timeout_ms: default_timeout_ms(),
      max_attempts: default_max_attempts(),
      base_delay_ms: default_base_delay_ms(),
      slow_threshold_ms: default_slow_threshold_ms(),
      retry_client_errors: default_true(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_ttl_secs")]
  pub ttl_secs: u64,
  /// Recency window for the `ranking` key, shorter than the general ttl
  #[serde(default = "default_ranking_fresh_secs")]
  pub ranking_fresh_secs: u64,
}

fn default_ttl_secs() -> u64 {
  300
}

fn default_ranking_fresh_secs() -> u64 {
  30
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_secs: default_ttl_secs(),
      ranking_fresh_secs: default_ranking_fresh_secs(),
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::from_secs(self.ttl_secs)
  }

  pub fn ranking_window(&self) -> Duration {
    Duration::from_secs(self.ranking_fresh_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
  /// SQLite file holding the offline queue (default: data dir)
  pub path: Option<PathBuf>,
  /// Delay between the online transition and the automatic replay
  #[serde(default = "default_replay_debounce_ms")]
  pub replay_debounce_ms: u64,
}

fn default_replay_debounce_ms() -> u64 {
  1_000
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      path: None,
      replay_debounce_ms: default_replay_debounce_ms(),
    }
  }
}

impl QueueConfig {
  pub fn replay_debounce(&self) -> Duration {
    Duration::from_millis(self.replay_debounce_ms)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
  #[serde(default = "default_probe_interval_secs")]
  pub interval_secs: u64,
  #[serde(default = "default_probe_timeout_ms")]
  pub timeout_ms: u64,
}

fn default_probe_interval_secs() -> u64 {
  10
}

fn default_probe_timeout_ms() -> u64 {
  3_000
}

impl Default for ProbeConfig {
  fn default() -> Self {
    Self {
      interval_secs: default_probe_interval_secs(),
      timeout_ms: default_probe_timeout_ms(),
    }
  }
}

impl ProbeConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs)
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_millis(self.timeout_ms)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tasklink.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tasklink/config.yaml
  ///
  /// Without any file the built-in defaults are used. `TASKLINK_API_URL`
  /// overrides the configured base URL in every case.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if let Ok(url) = std::env::var(API_URL_ENV) {
      config.api.url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("tasklink.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tasklink").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file deserializes to `null`
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Password for `login`, read from `TASKLINK_PASSWORD`.
  pub fn get_password() -> Result<String> {
    std::env::var("TASKLINK_PASSWORD")
      .map_err(|_| eyre!("Password not found. Set the TASKLINK_PASSWORD environment variable."))
  }
}
