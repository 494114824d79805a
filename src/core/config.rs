use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::{WatchError, WatchResult};

/// Watcher settings, persisted as `settings.json` in the config directory.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Where the game writes `Commander*.cmdrHistory` files.
    pub history_dir: PathBuf,
    /// Where the game writes `Journal.*.log` files.
    pub journal_dir: PathBuf,
    pub sounds_dir: PathBuf,
    /// Durable commander store.
    pub store_path: PathBuf,
    /// Beep for wing members once the wing-join window has passed.
    pub wing_notify: bool,
    pub poll_interval_ms: u64,
    /// Length of every transient suppression window.
    pub suppression_window_secs: u64,
    /// How long to wait for corroborating feed data before assuming an empty instance.
    pub reset_delay_secs: u64,
    /// 0..=100
    pub volume: u8,
    pub mute: bool,
}

impl Default for Settings {
    fn default() -> Self {
        // Rough guesses at the game's default locations; users can point elsewhere.
        let local_app_data = std::env::var("LOCALAPPDATA")
            .or_else(|_| std::env::var("HOME"))
            .unwrap_or_else(|_| ".".to_string());
        let user_profile = std::env::var("USERPROFILE")
            .or_else(|_| std::env::var("HOME"))
            .unwrap_or_else(|_| ".".to_string());

        Self {
            history_dir: PathBuf::from(local_app_data)
                .join("Frontier Developments/Elite Dangerous/CommanderHistory"),
            journal_dir: PathBuf::from(user_profile)
                .join("Saved Games/Frontier Developments/Elite Dangerous"),
            sounds_dir: PathBuf::from("sounds"),
            store_path: PathBuf::from("seen_commanders.json"),
            wing_notify: false,
            poll_interval_ms: 1000,
            suppression_window_secs: 60,
            reset_delay_secs: 5,
            volume: 100,
            mute: false,
        }
    }
}

impl Settings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn suppression_window(&self) -> Duration {
        Duration::from_secs(self.suppression_window_secs)
    }

    pub fn reset_delay(&self) -> Duration {
        Duration::from_secs(self.reset_delay_secs)
    }
}

pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            config_path: config_dir.as_ref().join("settings.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Missing or unreadable settings fall back to defaults.
    pub fn load(&self) -> Settings {
        let content = match fs::read_to_string(&self.config_path) {
            Ok(content) => content,
            Err(_) => return Settings::default(),
        };
        match serde_json::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Ignoring malformed settings {:?}: {}", self.config_path, e);
                Settings::default()
            }
        }
    }

    pub fn save(&self, settings: &Settings) -> WatchResult<()> {
        let write_err = |source| WatchError::Write {
            path: self.config_path.clone(),
            source,
        };
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = serde_json::to_string_pretty(settings).map_err(|source| WatchError::Serialize {
            what: "settings",
            source,
        })?;
        fs::write(&self.config_path, content).map_err(write_err)
    }
}
