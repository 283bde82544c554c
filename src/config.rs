use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Base URL the `/state/...` endpoints hang off
  pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Quiet period after the last edit before an entry is pushed
  pub debounce_secs: u64,
  /// Minimum interval between manifest checks
  pub freshness_secs: u64,
  /// How often the background poller asks for a reconciliation
  pub poll_secs: u64,
  /// Upper bound for a keepalive push during shutdown
  pub flush_timeout_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      debounce_secs: 30,
      freshness_secs: 5 * 60,
      poll_secs: 60,
      flush_timeout_secs: 5,
    }
  }
}

impl SyncConfig {
  pub fn debounce(&self) -> Duration {
    Duration::from_secs(self.debounce_secs)
  }

  pub fn freshness_window(&self) -> Duration {
    Duration::from_secs(self.freshness_secs)
  }

  pub fn poll_interval(&self) -> Duration {
    // A zero interval would make tokio's interval panic
    Duration::from_secs(self.poll_secs.max(1))
  }

  pub fn flush_timeout(&self) -> Duration {
    Duration::from_secs(self.flush_timeout_secs)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Database path (defaults to $XDG_DATA_HOME/statesync/state.db)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// An explicit path must exist. Otherwise the first existing default
  /// location is used.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    if let Some(path) = explicit_path {
      if !path.exists() {
        return Err(eyre!("Config file not found: {}", path.display()));
      }
      return Self::load_from_path(path);
    }

    let path = Self::search_paths()
      .into_iter()
      .find(|p| p.exists())
      .ok_or_else(|| {
        eyre!(
          "No configuration file found. Create ./statesync.yaml or \
           ~/.config/statesync/config.yaml with at least `server.url` set."
        )
      })?;
    Self::load_from_path(&path)
  }

  /// `./statesync.yaml`, then `$XDG_CONFIG_HOME/statesync/config.yaml`.
  fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("statesync.yaml")];
    paths.extend(dirs::config_dir().map(|dir| dir.join("statesync").join("config.yaml")));
    paths
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Get the bearer credential from the environment.
  ///
  /// The auth subsystem is external; it hands the token over in
  /// STATESYNC_TOKEN.
  pub fn get_api_token() -> Result<String> {
    std::env::var("STATESYNC_TOKEN")
      .map_err(|_| eyre!("Credential not found. Set the STATESYNC_TOKEN environment variable."))
  }
}

/// Per-user data directory: $XDG_DATA_HOME/statesync, falling back to
/// ~/.local/share/statesync.
pub fn data_dir() -> Result<PathBuf> {
  let base = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;
  Ok(base.join("statesync"))
}
