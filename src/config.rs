//! Application paths and session configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::entities::PayloadFormat;

pub const APP_DIR: &str = "panelcast";
pub const SETTINGS_FILE: &str = "settings.json";
pub const LOG_FILE: &str = "panelcast.log";
pub const SESSION_FILE: &str = "session.json";

/// Configuration for overriding default application paths
#[derive(Debug, Clone, Default)]
pub struct PathConfig {
    /// Custom config directory (from CLI or ENV)
    pub config_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Priority: CLI args -> ENV var (PANELCAST_CONFIG_DIR) -> None (platform default)
    pub fn from_env_and_cli(cli_dir: Option<PathBuf>) -> Self {
        let config_dir = cli_dir.or_else(|| {
            std::env::var("PANELCAST_CONFIG_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
        });
        Self { config_dir }
    }

    /// Config directory
    ///
    /// Platform paths:
    /// - Linux: ~/.config/panelcast
    /// - macOS: ~/Library/Application Support/panelcast
    /// - Windows: %APPDATA%\panelcast
    pub fn config_dir(&self) -> PathBuf {
        if let Some(dir) = &self.config_dir {
            return dir.clone();
        }
        dirs_next::config_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Data directory (logs). Same as config dir when overridden.
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.config_dir {
            return dir.clone();
        }
        dirs_next::data_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn config_file(&self, name: &str) -> PathBuf {
        self.config_dir().join(name)
    }

    pub fn data_file(&self, name: &str) -> PathBuf {
        self.data_dir().join(name)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_file(SETTINGS_FILE)
    }

    pub fn session_file(&self) -> PathBuf {
        self.config_file(SESSION_FILE)
    }

    /// Create config and data directories if missing
    pub fn ensure_dirs(&self) -> Result<()> {
        let config_dir = self.config_dir();
        std::fs::create_dir_all(&config_dir).with_context(|| {
            format!("Failed to create config directory: {}", config_dir.display())
        })?;

        let data_dir = self.data_dir();
        if data_dir != config_dir {
            std::fs::create_dir_all(&data_dir).with_context(|| {
                format!("Failed to create data directory: {}", data_dir.display())
            })?;
        }
        Ok(())
    }
}

/// Session defaults. Saved settings override geometry at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub width: u32,
    pub height: u32,
    pub rotation: u16,
    pub brightness: u8,
    pub fps: f32,
    pub auto_send: bool,
    pub transfer_timeout_ms: u64,
    pub transfer_workers: usize,
    pub payload_format: PayloadFormat,
    pub theme_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 320,
            rotation: 0,
            brightness: 100,
            fps: crate::core::player::DEFAULT_FPS,
            auto_send: true,
            transfer_timeout_ms: 5000,
            transfer_workers: 2,
            payload_format: PayloadFormat::Rgb565,
            theme_dir: None,
        }
    }
}

impl SessionConfig {
    /// Read from `path`. Missing file -> defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read session config: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse session config: {}", path.display()))
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms.max(1))
    }
}
