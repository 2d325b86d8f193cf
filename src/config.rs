use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  #[serde(default)]
  pub cache: CacheSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  /// Base URL of the inventory API, e.g. `https://inventory.example.com/api`
  pub url: String,
  /// Per-request timeout at the network boundary
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl ServerConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct CacheSettings {
  /// How long a fetched value counts as fresh
  #[serde(default = "default_stale_after_secs")]
  pub stale_after_secs: u64,
  /// Poll interval for goal progress while the goal is running
  #[serde(default = "default_goal_poll_secs")]
  pub goal_poll_secs: u64,
}

impl CacheSettings {
  pub fn stale_after(&self) -> Duration {
    Duration::from_secs(self.stale_after_secs)
  }

  pub fn goal_poll(&self) -> Duration {
    Duration::from_secs(self.goal_poll_secs)
  }
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      stale_after_secs: default_stale_after_secs(),
      goal_poll_secs: default_goal_poll_secs(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_stale_after_secs() -> u64 {
  60
}

fn default_goal_poll_secs() -> u64 {
  30
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./craftq.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/craftq/config.yaml
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
        "No configuration file found. Create one at ~/.config/craftq/config.yaml \
         or pass --server."
      )),
    }
  }

  /// Configuration for a server given on the command line; file settings are
  /// used when one exists.
  pub fn load_or_server(explicit_path: Option<&Path>, server: Option<&str>) -> Result<Self> {
    let found = match explicit_path {
      Some(_) => Some(Self::load(explicit_path)?),
      None => Self::find_config_file()
        .map(|p| Self::load_from_path(&p))
        .transpose()?,
    };

    match (found, server) {
      (Some(mut config), Some(url)) => {
        config.server.url = url.to_string();
        Ok(config)
      }
      (Some(config), None) => Ok(config),
      (None, Some(url)) => Ok(Self {
        server: ServerConfig {
          url: url.to_string(),
          timeout_secs: default_timeout_secs(),
        },
        cache: CacheSettings::default(),
      }),
      (None, None) => Self::load(None),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("craftq.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("craftq").join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get the API token from environment variables.
  ///
  /// Checks CRAFTQ_API_TOKEN first, then CRAFTQ_TOKEN as fallback. No token
  /// means the session starts signed out.
  pub fn api_token() -> Option<String> {
    std::env::var("CRAFTQ_API_TOKEN")
      .or_else(|_| std::env::var("CRAFTQ_TOKEN"))
      .ok()
      .filter(|token| !token.trim().is_empty())
  }
}
