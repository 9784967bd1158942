use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const API_URL_ENV: &str = "RESYNC_API_URL";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub listing: ListingConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL, e.g. "https://api.example.com/v1"
  pub url: Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: None,
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingConfig {
  /// Page size applied when a listing command gives no --limit
  pub default_limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_level")]
  pub level: String,
  /// Where daily log files go (defaults to the data dir)
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_level(),
      directory: None,
    }
  }
}

fn default_level() -> String {
  "info".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./resync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/resync/config.yaml
  ///
  /// A missing file is not an error here; the API URL may still come from
  /// `RESYNC_API_URL`.
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
      None => Config::default(),
    };

    if let Ok(url) = std::env::var(API_URL_ENV) {
      if !url.trim().is_empty() {
        config.api.url = Some(url);
      }
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("resync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("resync").join("config.yaml");
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

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    // An empty file deserializes to unit, not an empty mapping.
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    serde_yaml::from_str(contents)
  }

  /// The API base URL, required by every command that talks to the server.
  pub fn api_url(&self) -> Result<&str> {
    self.api.url.as_deref().ok_or_else(|| {
      eyre!(
        "No API URL configured. Set api.url in ~/.config/resync/config.yaml\n\
         or the {} environment variable.",
        API_URL_ENV
      )
    })
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.api.timeout_secs)
  }
}
