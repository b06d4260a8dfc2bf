use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::TtlCache;

const TOKEN_VAR: &str = "BOARDCACHE_API_TOKEN";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
  /// Board used when none is given on the command line
  pub default_board: Option<String>,
  /// Profile id recorded as creator of optimistic cards
  pub user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub base_url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_ttl_secs")]
  pub ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      ttl_secs: default_ttl_secs(),
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::from_secs(self.ttl_secs)
  }

  /// Cache described by this section. A disabled cache never hits.
  pub fn build(&self) -> TtlCache {
    if self.enabled {
      TtlCache::in_memory().with_default_ttl(self.ttl())
    } else {
      TtlCache::disabled().with_default_ttl(self.ttl())
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  /// `EnvFilter` directive, overridden by RUST_LOG
  #[serde(default = "default_filter")]
  pub filter: String,
  /// Also write logs to this file
  pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      filter: default_filter(),
      file: None,
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_ttl_secs() -> u64 {
  60
}

fn default_true() -> bool {
  true
}

fn default_filter() -> String {
  "warn".to_string()
}

impl Config {
  /// Config with defaults for everything but the API base url.
  pub fn with_base_url(base_url: impl Into<String>) -> Self {
    Self {
      api: ApiConfig {
        base_url: base_url.into(),
        timeout_secs: default_timeout_secs(),
      },
      cache: CacheConfig::default(),
      logging: LoggingConfig::default(),
      default_board: None,
      user_id: None,
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./boardcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/boardcache/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    match Self::locate(explicit_path)? {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/boardcache/config.yaml \
         or pass --base-url.\nSee config.example.yaml for the format."
      )),
    }
  }

  /// Path of the config file to use, if any exists.
  pub fn locate(explicit_path: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(p) = explicit_path {
      if p.exists() {
        return Ok(Some(p.to_path_buf()));
      }
      return Err(eyre!("Config file not found: {}", p.display()));
    }
    Ok(Self::find_config_file())
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("boardcache.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("boardcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  pub fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// API token from BOARDCACHE_API_TOKEN, if set.
  pub fn get_api_token() -> Option<String> {
    std::env::var(TOKEN_VAR).ok().filter(|t| !t.trim().is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_fills_defaults() {
    let config = Config::parse("api:\n  base_url: http://localhost:8080/api\n").unwrap();

    assert_eq!(config.api.base_url, "http://localhost:8080/api");
    assert_eq!(config.api.timeout_secs, 30);
    assert!(config.cache.enabled);
    assert_eq!(config.cache.ttl(), Duration::from_secs(60));
    assert_eq!(config.logging.filter, "warn");
    assert!(config.logging.file.is_none());
    assert!(config.default_board.is_none());
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
api:
  base_url: https://boards.example.com/api
  timeout_secs: 5
cache:
  enabled: false
  ttl_secs: 10
logging:
  filter: boardcache=debug
  file: /tmp/boardcache.log
default_board: b1
user_id: u1
"#;
    let config = Config::parse(yaml).unwrap();

    assert_eq!(config.api.timeout_secs, 5);
    assert!(!config.cache.enabled);
    assert_eq!(config.cache.ttl_secs, 10);
    assert_eq!(config.logging.filter, "boardcache=debug");
    assert_eq!(config.logging.file, Some(PathBuf::from("/tmp/boardcache.log")));
    assert_eq!(config.default_board.as_deref(), Some("b1"));
    assert_eq!(config.user_id.as_deref(), Some("u1"));
  }

  #[test]
  fn test_missing_api_section_is_an_error() {
    assert!(Config::parse("cache:\n  enabled: true\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_load_from_path() {
    let path = std::env::temp_dir().join(format!("boardcache-test-{}.yaml", std::process::id()));
    std::fs::write(&path, "api:\n  base_url: http://127.0.0.1:1\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(config.api.base_url, "http://127.0.0.1:1");
  }

  #[test]
  fn test_disabled_cache_never_hits() {
    let config = CacheConfig {
      enabled: false,
      ttl_secs: 60,
    };
    let cache = config.build();
    assert_eq!(cache.default_ttl(), Duration::from_secs(60));

    let key = crate::board::BoardLists("b1");
    cache.set_default(&key, &Vec::new());
    assert_eq!(cache.get(&key), None);
  }
}
