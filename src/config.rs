use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{CacheSettings, CACHE_VERSION, DEFAULT_PREFIX};
use crate::content::Page;
use crate::prefetch::PrefetchSettings;
use crate::trigger::{ClearTrigger, KeyCombo, DEFAULT_CLEAR_COMBO};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub content: ContentConfig,
  /// Page shown on startup (defaults to home)
  pub default_page: Option<Page>,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub prefetch: PrefetchConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentConfig {
  /// Base URL of the content API, e.g. "https://cms.example.com"
  pub url: String,
  /// Per-request timeout
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  15
}

impl ContentConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Prefix of the storage key snapshots are written under
  pub prefix: String,
  pub stale_time_secs: u64,
  pub max_age_hours: u64,
  pub persist_debounce_ms: u64,
  /// Key combination that clears the cache, e.g. "ctrl+shift+k"
  pub clear_key: KeyCombo,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: DEFAULT_PREFIX.to_string(),
      stale_time_secs: 5 * 60,
      max_age_hours: 24,
      persist_debounce_ms: 1000,
      clear_key: DEFAULT_CLEAR_COMBO,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
  pub enabled: bool,
  pub settle_delay_ms: u64,
  pub primary_wait_budget_ms: u64,
  pub inter_request_delay_ms: u64,
  pub timeout_backoff_ms: u64,
}

impl Default for PrefetchConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      settle_delay_ms: 2000,
      primary_wait_budget_ms: 15000,
      inter_request_delay_ms: 1000,
      timeout_backoff_ms: 5000,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./folio.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/folio/config.yaml
  /// 4. ~/.config/folio/config.yaml
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
        "No configuration file found. Create one at ~/.config/folio/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("folio.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("folio").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;

    // Reject reserved bindings up front rather than at first key press
    config.clear_trigger()?;

    Ok(config)
  }

  /// Get the content API token from environment variables.
  ///
  /// Checks FOLIO_API_TOKEN first, then STRAPI_API_TOKEN as fallback. The
  /// public content API works without one.
  pub fn get_api_token() -> Option<String> {
    std::env::var("FOLIO_API_TOKEN")
      .or_else(|_| std::env::var("STRAPI_API_TOKEN"))
      .ok()
      .filter(|token| !token.is_empty())
  }

  pub fn start_page(&self) -> Page {
    self.default_page.unwrap_or(Page::Home)
  }

  pub fn cache_settings(&self) -> CacheSettings {
    CacheSettings {
      prefix: self.cache.prefix.clone(),
      version: CACHE_VERSION.to_string(),
      default_stale_time: Duration::from_secs(self.cache.stale_time_secs),
      max_age: Duration::from_secs(self.cache.max_age_hours.saturating_mul(60 * 60)),
      persist_debounce: Duration::from_millis(self.cache.persist_debounce_ms),
    }
  }

  pub fn prefetch_settings(&self) -> PrefetchSettings {
    PrefetchSettings {
      settle_delay: Duration::from_millis(self.prefetch.settle_delay_ms),
      primary_wait_budget: Duration::from_millis(self.prefetch.primary_wait_budget_ms),
      inter_request_delay: Duration::from_millis(self.prefetch.inter_request_delay_ms),
      timeout_backoff: Duration::from_millis(self.prefetch.timeout_backoff_ms),
    }
  }

  pub fn clear_trigger(&self) -> Result<ClearTrigger> {
    ClearTrigger::new(self.cache.clear_key)
  }
}
