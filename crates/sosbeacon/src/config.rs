//! Configuration management for sosbeacon.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "sosbeacon";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "sos_events.db";

/// Default media directory name.
const MEDIA_DIR_NAME: &str = "media";

/// Default recordings working directory name.
const RECORDINGS_DIR_NAME: &str = "recordings";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `SOSBEACON_`)
/// 2. TOML config file at `~/.config/sosbeacon/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Activation configuration.
    pub sos: SosConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Device stand-in configuration.
    pub device: DeviceConfig,
}

/// Activation-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SosConfig {
    /// User the SOS events are filed under.
    pub user_id: String,
    /// Length of the recorded audio clip in seconds.
    pub recording_duration_secs: u64,
    /// How long to wait for a location fix in seconds.
    pub location_timeout_secs: u64,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/sosbeacon/sos_events.db`
    pub database_path: Option<PathBuf>,
    /// Directory uploaded clips are stored in.
    /// Defaults to `~/.local/share/sosbeacon/media`
    pub media_dir: Option<PathBuf>,
    /// Base URL uploaded clips are published under.
    /// Defaults to a `file://` URL of the media directory.
    pub public_base_url: Option<String>,
}

/// Configuration of the headless device stand-ins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Latitude reported by the location stand-in.
    pub latitude: f64,
    /// Longitude reported by the location stand-in.
    pub longitude: f64,
    /// Accuracy radius in meters reported with the fix.
    pub accuracy_m: f64,
    /// Whether location permission is granted.
    pub location_permission: bool,
    /// Whether microphone permission is granted.
    pub microphone_permission: bool,
    /// Clip copied into each recording. A silent clip is generated if unset.
    pub clip_path: Option<PathBuf>,
    /// Working directory for in-progress recordings.
    /// Defaults to `~/.local/share/sosbeacon/recordings`
    pub recordings_dir: Option<PathBuf>,
}

impl Default for SosConfig {
    fn default() -> Self {
        Self {
            user_id: "local-user".to_string(),
            recording_duration_secs: 10,
            location_timeout_secs: 15,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            accuracy_m: 10.0,
            location_permission: true,
            microphone_permission: true,
            clip_path: None,
            recordings_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `SOSBEACON_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed("SOSBEACON_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.sos.user_id.trim().is_empty() {
            return Err(Error::ConfigValidation {
                message: "user_id must not be empty".to_string(),
            });
        }

        if self.sos.recording_duration_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "recording_duration_secs must be greater than 0".to_string(),
            });
        }

        if self.sos.location_timeout_secs == 0 {
            return Err(Error::ConfigValidation {
                message: "location_timeout_secs must be greater than 0".to_string(),
            });
        }

        if !(-90.0..=90.0).contains(&self.device.latitude) {
            return Err(Error::ConfigValidation {
                message: format!("latitude ({}) must be within [-90, 90]", self.device.latitude),
            });
        }

        if !(-180.0..=180.0).contains(&self.device.longitude) {
            return Err(Error::ConfigValidation {
                message: format!(
                    "longitude ({}) must be within [-180, 180]",
                    self.device.longitude
                ),
            });
        }

        if self.device.accuracy_m.is_nan() || self.device.accuracy_m < 0.0 {
            return Err(Error::ConfigValidation {
                message: "accuracy_m must not be negative".to_string(),
            });
        }

        if let Some(url) = &self.storage.public_base_url {
            if url.trim().is_empty() {
                return Err(Error::ConfigValidation {
                    message: "public_base_url must not be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the media directory, resolving defaults if not set.
    #[must_use]
    pub fn media_dir(&self) -> PathBuf {
        self.storage
            .media_dir
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(MEDIA_DIR_NAME))
    }

    /// Get the public base URL for uploaded clips, resolving defaults if not set.
    #[must_use]
    pub fn public_base_url(&self) -> String {
        self.storage
            .public_base_url
            .clone()
            .unwrap_or_else(|| format!("file://{}", self.media_dir().display()))
    }

    /// Get the recordings working directory, resolving defaults if not set.
    #[must_use]
    pub fn recordings_dir(&self) -> PathBuf {
        self.device
            .recordings_dir
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(RECORDINGS_DIR_NAME))
    }

    /// Get the recording window as a Duration.
    #[must_use]
    pub fn recording_window(&self) -> Duration {
        Duration::from_secs(self.sos.recording_duration_secs)
    }

    /// Get the location timeout as a Duration.
    #[must_use]
    pub fn location_timeout(&self) -> Duration {
        Duration::from_secs(self.sos.location_timeout_secs)
    }
}
