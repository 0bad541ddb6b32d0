use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{PersistOptions, RetryPolicy, StoreConfig};
use crate::window::{DEFAULT_OVERSCAN, DEFAULT_THRESHOLD};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub ui: UiConfig,
  /// Difficulty applied when the filter does not name one
  pub default_difficulty: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  15
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub stale_time_secs: u64,
  pub gc_time_secs: u64,
  pub max_retries: u32,
  pub retry_base_ms: u64,
  pub retry_max_ms: u64,
  /// Keep a snapshot of the cache between runs
  pub persist: bool,
  /// Resource families included in the snapshot
  pub persist_allow_list: Vec<String>,
  pub max_snapshot_bytes: usize,
  /// Database location (default: $XDG_DATA_HOME/issuedeck/cache.db)
  pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    let persist = PersistOptions::default();
    Self {
      stale_time_secs: 5 * 60,
      gc_time_secs: 10 * 60,
      max_retries: 2,
      retry_base_ms: 1000,
      retry_max_ms: 30_000,
      persist: true,
      persist_allow_list: persist.allow_list,
      max_snapshot_bytes: persist.max_bytes,
      path: None,
    }
  }
}

impl CacheConfig {
  pub fn store_config(&self) -> StoreConfig {
    StoreConfig {
      stale_time: Duration::from_secs(self.stale_time_secs),
      gc_time: Duration::from_secs(self.gc_time_secs),
      retry: RetryPolicy::new(
        self.max_retries,
        Duration::from_millis(self.retry_base_ms),
        Duration::from_millis(self.retry_max_ms),
      ),
      on_auth_error: None,
    }
  }

  pub fn persist_options(&self) -> PersistOptions {
    PersistOptions {
      allow_list: self.persist_allow_list.clone(),
      max_bytes: self.max_snapshot_bytes,
      ..PersistOptions::default()
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UiConfig {
  pub overscan: usize,
  pub virtualization_threshold: usize,
  pub filter_debounce_ms: u64,
}

impl Default for UiConfig {
  fn default() -> Self {
    Self {
      overscan: DEFAULT_OVERSCAN,
      virtualization_threshold: DEFAULT_THRESHOLD,
      filter_debounce_ms: 300,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./issuedeck.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/issuedeck/config.yaml
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
        "No configuration file found. Create one at ~/.config/issuedeck/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("issuedeck.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("issuedeck").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.api.url.trim().is_empty() {
      return Err(eyre!("api.url must not be empty"));
    }
    Ok(config)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.api.timeout_secs)
  }

  /// Get the API token from the environment, if set.
  ///
  /// Checks ISSUEDECK_API_TOKEN. Anonymous access is allowed.
  pub fn get_api_token() -> Option<String> {
    std::env::var("ISSUEDECK_API_TOKEN")
      .ok()
      .filter(|token| !token.trim().is_empty())
  }
}

/// `$XDG_DATA_HOME/issuedeck`, falling back to `~/.local/share/issuedeck`.
pub fn data_dir() -> Option<PathBuf> {
  dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
    .map(|dir| dir.join("issuedeck"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("api:\n  url: https://issues.example.com/api\n").unwrap();
    assert_eq!(config.api.timeout_secs, 15);
    assert_eq!(config.cache.stale_time_secs, 300);
    assert!(config.cache.persist);
    assert_eq!(config.cache.persist_allow_list, vec!["issues", "bookmarks"]);
    assert_eq!(config.ui.overscan, 5);
    assert_eq!(config.ui.virtualization_threshold, 50);
    assert_eq!(config.default_difficulty, None);
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
api:
  url: http://localhost:8080
  timeout_secs: 3
cache:
  stale_time_secs: 60
  max_retries: 4
  persist: false
  persist_allow_list: [bookmarks]
ui:
  filter_debounce_ms: 150
default_difficulty: beginner
"#;
    let config = Config::parse(yaml).unwrap();
    assert_eq!(config.request_timeout(), Duration::from_secs(3));
    assert!(!config.cache.persist);
    assert_eq!(config.ui.filter_debounce_ms, 150);
    assert_eq!(config.ui.overscan, 5);
    assert_eq!(config.default_difficulty.as_deref(), Some("beginner"));

    let store = config.cache.store_config();
    assert_eq!(store.stale_time, Duration::from_secs(60));
    assert_eq!(store.gc_time, Duration::from_secs(600));
    assert_eq!(store.retry.max_retries, 4);

    let persist = config.cache.persist_options();
    assert_eq!(persist.allow_list, vec!["bookmarks"]);
    assert_eq!(persist.max_age, Duration::from_secs(24 * 60 * 60));
  }

  #[test]
  fn test_missing_url_is_rejected() {
    assert!(Config::parse("cache:\n  persist: true\n").is_err());
    assert!(Config::parse("api:\n  url: '  '\n").is_err());
  }
}
