//! Configuration system for Caffeine
//!
//! Loads configuration from TOML file at `~/.config/caffeine/config.toml`
//! Auto-generates default config file on first run if missing.
//! The user toggle is persisted separately in `$XDG_STATE_HOME/caffeine/state.toml`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Publish an icon name in the status snapshot
    pub show_indicator: bool,
    /// Send a desktop notification when inhibition starts or stops
    pub show_notifications: bool,
    /// Restore the user toggle from the last session
    pub restore_state_on_startup: bool,
    /// Inhibit while a window is fullscreen
    pub enable_fullscreen: bool,
    /// Match foreign inhibitors to windows by pid and WM_CLASS
    pub address_inhibitor_by_heuristic: bool,
    /// Turning the user toggle off also releases fullscreen and app inhibitors
    pub user_off_releases_all: bool,
    /// Applications that inhibit while they run (WM_CLASS or desktop id)
    pub inhibit_apps: Vec<String>,
    /// When to pause night light while inhibiting
    pub night_light: NightLightMode,
    /// Settle delay before fullscreen state is re-evaluated
    pub fullscreen_settle_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            show_indicator: true,
            show_notifications: true,
            restore_state_on_startup: false,
            enable_fullscreen: true,
            address_inhibitor_by_heuristic: false,
            user_off_releases_all: false,
            inhibit_apps: Vec::new(),
            night_light: NightLightMode::Never,
            fullscreen_settle_ms: 2000,
        }
    }
}

/// Night light behavior while inhibited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NightLightMode {
    #[default]
    Never,
    Always,
    /// Only when an allowlisted application is inhibiting
    ForApps,
}

impl Config {
    /// Load configuration from file, or use defaults if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            // Auto-generate default config file
            if let Err(e) = Self::save_default(&config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Configuration loaded from {:?}", path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("caffeine");

        Ok(config_dir.join("config.toml"))
    }

    /// Save default configuration to file
    fn save_default(path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let default_config = Self::default();
        let toml_string =
            toml::to_string_pretty(&default_config).context("Failed to serialize default config")?;

        fs::write(path, toml_string).context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }

    pub fn fullscreen_settle(&self) -> Duration {
        Duration::from_millis(self.fullscreen_settle_ms)
    }
}

/// State remembered between sessions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct State {
    pub user_enabled: bool,
}

impl State {
    pub fn state_path() -> Result<PathBuf> {
        let state_dir = dirs::state_dir()
            .or_else(dirs::config_dir)
            .context("Failed to get state directory")?
            .join("caffeine");

        Ok(state_dir.join("state.toml"))
    }

    /// Load saved state, falling back to defaults on any error
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring unreadable state file {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create state directory")?;
        }
        let toml_string = toml::to_string_pretty(self).context("Failed to serialize state")?;
        fs::write(path, toml_string).context("Failed to write state file")?;
        debug!("Saved state to {:?}", path);
        Ok(())
    }
}
