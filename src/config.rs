use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Base URL of the posts API
  pub api_url: String,
  /// How long a fetched list stays fresh; 0 refetches on every request
  pub stale_time_secs: u64,
  pub request_timeout_secs: u64,
  /// Default log filter, overridden by the QUENCH_LOG environment variable
  pub log_filter: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      api_url: "https://jsonplaceholder.typicode.com".to_string(),
      stale_time_secs: 0,
      request_timeout_secs: 10,
      log_filter: "quench=info".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./quench.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/quench/config.yaml
  /// 4. ~/.config/quench/config.yaml
  ///
  /// With no file anywhere the built-in defaults are used; the demo talks
  /// to JSONPlaceholder out of the box.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("quench.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("quench").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  pub fn stale_time(&self) -> Duration {
    Duration::from_secs(self.stale_time_secs)
  }
}
