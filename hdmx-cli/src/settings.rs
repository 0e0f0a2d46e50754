//! Persistent settings

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hdmx_client::{ClientConfig, DEFAULT_HOST, DEFAULT_PORT};
use hdmx_sim::VirtualMatrixConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Settings for the simulated switch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulatorSettings {
    /// Address `hdmx simulate` listens on
    pub listen: String,
    /// Initial state of the virtual matrix
    pub matrix: VirtualMatrixConfig,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            listen: format!("127.0.0.1:{}", DEFAULT_PORT),
            matrix: VirtualMatrixConfig::default(),
        }
    }
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Switch address
    pub host: String,
    /// Switch TCP control port
    pub port: u16,
    /// Client timings and probe strategies
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub simulator: SimulatorSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            client: ClientConfig::default(),
            simulator: SimulatorSettings::default(),
        }
    }
}

impl Settings {
    /// Get the XDG config directory for hdmx
    /// Uses $XDG_CONFIG_HOME/hdmx on Linux/macOS, falls back to ~/.config/hdmx
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("hdmx"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("hdmx"))
    }

    /// Get the settings file path
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from disk, falling back to defaults
    pub fn load() -> Self {
        Self::settings_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    /// Load settings from `path`; a missing file yields defaults
    pub fn load_from(path: &Path) -> Self {
        let Ok(json) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&json) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring invalid settings in {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::settings_path().context("Could not determine settings path")?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("hdmx-settings-{}-{}", name, std::process::id()))
            .join("settings.json")
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.host, "10.0.0.10");
        assert_eq!(settings.port, 1110);
        assert_eq!(settings.client, ClientConfig::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"host": "192.168.1.50", "port": 2000}"#).unwrap();
        assert_eq!(settings.host, "192.168.1.50");
        assert_eq!(settings.port, 2000);
        assert_eq!(settings.client.probe_timeout_ms, 3000);
        assert_eq!(settings.simulator.listen, "127.0.0.1:1110");
    }

    #[test]
    fn test_save_then_load() {
        let path = scratch_path("roundtrip");
        let mut settings = Settings::default();
        settings.host = "matrix.local".to_string();
        settings.client.set_settle_ms = 250;

        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path), settings);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_missing_or_invalid_file_gives_defaults() {
        let path = scratch_path("invalid");
        assert_eq!(Settings::load_from(&path), Settings::default());

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
