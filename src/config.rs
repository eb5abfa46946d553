//! Tracker configuration: upstream endpoint, polling cadence, and failure
//! escalation limits. Loaded from an optional TOML file pointed to by
//! `TRACKER_CONFIG_PATH`, with environment overrides for the upstream
//! endpoint and API key.

use serde::Deserialize;
use tracing::{error, info};

fn default_base_url() -> String {
  "http://localhost:8080".into()
}
fn default_poll_interval_ms() -> u64 {
  2000
}
fn default_request_timeout_secs() -> u64 {
  20
}
fn default_max_fetch_failures() -> u32 {
  5
}

#[derive(Clone, Debug, Deserialize)]
pub struct TrackerConfig {
  /// Base URL of the upstream generation service.
  #[serde(default = "default_base_url")]
  pub upstream_base_url: String,
  /// Optional bearer token for the upstream.
  #[serde(default)]
  pub upstream_api_key: Option<String>,
  /// How often the status endpoint is polled while a job is active.
  #[serde(default = "default_poll_interval_ms")]
  pub poll_interval_ms: u64,
  /// Per-request timeout for upstream calls.
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
  /// Consecutive status-fetch failures tolerated before the tracker
  /// escalates to a terminal error and stops polling.
  #[serde(default = "default_max_fetch_failures")]
  pub max_fetch_failures: u32,
}

impl Default for TrackerConfig {
  fn default() -> Self {
    Self {
      upstream_base_url: default_base_url(),
      upstream_api_key: None,
      poll_interval_ms: default_poll_interval_ms(),
      request_timeout_secs: default_request_timeout_secs(),
      max_fetch_failures: default_max_fetch_failures(),
    }
  }
}

/// Load config from TRACKER_CONFIG_PATH (TOML) if present, then apply env
/// overrides. Any read/parse error falls back to defaults with a log line,
/// so a broken config file never prevents startup.
pub fn load_config_from_env() -> TrackerConfig {
  let mut cfg = match std::env::var("TRACKER_CONFIG_PATH") {
    Ok(path) => match std::fs::read_to_string(&path) {
      Ok(s) => match toml::from_str::<TrackerConfig>(&s) {
        Ok(cfg) => {
          info!(target: "examtrack_backend", %path, "Loaded tracker config (TOML)");
          cfg
        }
        Err(e) => {
          error!(target: "examtrack_backend", %path, error = %e, "Failed to parse TOML config; using defaults");
          TrackerConfig::default()
        }
      },
      Err(e) => {
        error!(target: "examtrack_backend", %path, error = %e, "Failed to read TOML config file; using defaults");
        TrackerConfig::default()
      }
    },
    Err(_) => TrackerConfig::default(),
  };

  if let Ok(url) = std::env::var("UPSTREAM_BASE_URL") {
    cfg.upstream_base_url = url;
  }
  if let Ok(key) = std::env::var("UPSTREAM_API_KEY") {
    cfg.upstream_api_key = Some(key);
  }
  cfg
}
