use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use url::Url;

use crate::gateway::{DEFAULT_API_PATTERNS, DEFAULT_STATIC_EXTENSIONS};
use crate::http::{Credentials, RetryPolicy};
use crate::realtime::ReconnectPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub realtime: RealtimeConfig,
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Backend REST base URL; API paths resolve beneath any path prefix
  pub base_url: Url,
  pub timeout_secs: u64,
  pub max_retries: u32,
  /// Linear backoff step between retries
  pub retry_delay_ms: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: parse_default("http://localhost:3001"),
      timeout_secs: 30,
      max_retries: 3,
      retry_delay_ms: 1000,
    }
  }
}

impl ApiConfig {
  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_retries: self.max_retries,
      retry_delay: Duration::from_millis(self.retry_delay_ms),
      timeout: Duration::from_secs(self.timeout_secs),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
  /// WebSocket endpoint for push updates
  pub url: Url,
  pub max_reconnect_attempts: u32,
  pub reconnect_base_delay_ms: u64,
  /// Buffer outgoing messages while disconnected instead of dropping them
  pub queue_while_offline: bool,
  pub max_queued_messages: usize,
}

impl Default for RealtimeConfig {
  fn default() -> Self {
    Self {
      url: parse_default("ws://localhost:3001/ws"),
      max_reconnect_attempts: 5,
      reconnect_base_delay_ms: 1000,
      queue_while_offline: false,
      max_queued_messages: 100,
    }
  }
}

impl RealtimeConfig {
  pub fn reconnect_policy(&self) -> ReconnectPolicy {
    ReconnectPolicy {
      max_attempts: self.max_reconnect_attempts,
      base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
  /// Persistent SQLite database
  #[default]
  Sqlite,
  /// Process memory only
  Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Origin of the dashboard pages; relative URLs resolve against it
  pub origin: Url,
  /// Cache version, part of every bucket name
  pub version: String,
  pub storage: StorageKind,
  /// Database location (defaults to the user data directory)
  pub path: Option<PathBuf>,
  /// Old bucket name kept alive across activations
  pub legacy_bucket: String,
  /// Root assets stored at install time
  pub precache: Vec<String>,
  pub static_extensions: Vec<String>,
  pub api_patterns: Vec<String>,
  pub fetch_timeout_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      origin: parse_default("http://localhost:3000"),
      version: "v1.0.0".to_string(),
      storage: StorageKind::default(),
      path: None,
      legacy_bucket: "omnix-ai-v1".to_string(),
      precache: ["/", "/index.html", "/manifest.json", "/favicon.ico"]
        .iter()
        .map(|s| s.to_string())
        .collect(),
      static_extensions: DEFAULT_STATIC_EXTENSIONS
        .iter()
        .map(|s| s.to_string())
        .collect(),
      api_patterns: DEFAULT_API_PATTERNS.iter().map(|s| s.to_string()).collect(),
      fetch_timeout_secs: 15,
    }
  }
}

impl CacheConfig {
  pub fn static_bucket(&self) -> String {
    format!("omnix-static-{}", self.version)
  }

  pub fn dynamic_bucket(&self) -> String {
    format!("omnix-dynamic-{}", self.version)
  }

  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_secs(self.fetch_timeout_secs)
  }
}

fn parse_default(url: &str) -> Url {
  // Only called with the literal defaults above
  Url::parse(url).unwrap_or_else(|e| panic!("invalid built-in URL {}: {}", url, e))
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./omnix.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/omnix/config.yaml
  ///
  /// Without any file the built-in defaults (local development backend) apply.
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
      None => {
        info!("no configuration file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("omnix.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("omnix").join("config.yaml");
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

  pub fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file is a valid, all-defaults config
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Get API credentials from environment variables.
  ///
  /// Reads OMNIX_API_TOKEN and OMNIX_REFRESH_TOKEN; both are optional.
  pub fn credentials() -> Credentials {
    Credentials {
      access_token: std::env::var("OMNIX_API_TOKEN").ok(),
      refresh_token: std::env::var("OMNIX_REFRESH_TOKEN").ok(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_config_uses_defaults() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.api.base_url.as_str(), "http://localhost:3001/");
    assert_eq!(config.realtime.max_reconnect_attempts, 5);
    assert_eq!(config.cache.static_bucket(), "omnix-static-v1.0.0");
    assert_eq!(config.cache.dynamic_bucket(), "omnix-dynamic-v1.0.0");
    assert_eq!(config.cache.storage, StorageKind::Sqlite);
  }

  #[test]
  fn test_partial_config_keeps_other_defaults() {
    let config = Config::parse(
      r#"
api:
  base_url: https://omnix.example.com
  max_retries: 1
realtime:
  reconnect_base_delay_ms: 250
cache:
  version: v2
  storage: memory
"#,
    )
    .unwrap();

    assert_eq!(config.api.base_url.as_str(), "https://omnix.example.com/");
    assert_eq!(config.api.retry_policy().max_retries, 1);
    assert_eq!(config.api.retry_policy().timeout, Duration::from_secs(30));
    assert_eq!(
      config.realtime.reconnect_policy().base_delay,
      Duration::from_millis(250)
    );
    assert_eq!(config.cache.static_bucket(), "omnix-static-v2");
    assert_eq!(config.cache.storage, StorageKind::Memory);
    assert!(config.cache.precache.contains(&"/".to_string()));
  }

  #[test]
  fn test_invalid_url_is_rejected() {
    assert!(Config::parse("api:\n  base_url: not a url\n").is_err());
  }
}
