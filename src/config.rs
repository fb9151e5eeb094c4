//! Console configuration using Figment.
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. built-in defaults ([`ConsoleConfig::default`])
//! 2. `config/console.toml` (or the path given on the command line)
//! 3. environment variables prefixed with `MOCAP_`
//!
//! The first underscore after the prefix separates the section from the key, so
//! `MOCAP_SERVICE_ADDRESS` sets `service.address` and
//! `MOCAP_RECORDING_PROGRESS_CHUNK_BYTES` sets `recording.progress_chunk_bytes`.
//!
//! # Example
//! ```no_run
//! use mocap_console::config::ConsoleConfig;
//!
//! let config = ConsoleConfig::load()?;
//! config.validate()?;
//! println!("Service: {}", config.service.address);
//! # Ok::<(), mocap_console::error::ConsoleError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConsoleError, ConsoleResult};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/console.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "MOCAP_";

/// Top-level console configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Sensing service link
    pub service: ServiceConfig,
    /// Durable storage locations
    pub storage: StorageConfig,
    /// Calibration defaults
    pub calibration: CalibrationSettings,
    /// Session recording and export
    pub recording: RecordingConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Mocap Console".to_string(),
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
        }
    }
}

/// Sensing service connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// `host:port` of the sensing service
    pub address: String,
    /// Delay between reconnect attempts in milliseconds
    pub reconnect_delay_ms: u64,
    /// Queue length for console commands and per-subscriber events
    pub event_buffer: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3001".to_string(),
            reconnect_delay_ms: 2000,
            event_buffer: 256,
        }
    }
}

/// Durable storage locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// File holding persisted calibration
    pub state_file: PathBuf,
    /// Directory receiving exported session archives
    pub export_dir: PathBuf,
}

fn data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mocap-console")
}

impl Default for StorageConfig {
    fn default() -> Self {
        let root = data_root();
        Self {
            state_file: root.join("calibration.json"),
            export_dir: root.join("exports"),
        }
    }
}

/// Calibration defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationSettings {
    /// Distance between the two scale markers in metres
    pub reference_distance_m: f64,
    /// Check matrix dimensions of operator edits
    pub strict_shapes: bool,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            reference_distance_m: 0.119,
            strict_shapes: false,
        }
    }
}

/// Session recording and export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Ask the service to store raw camera media by default
    pub record_raw_media: bool,
    /// Bytes compressed between progress reports
    pub progress_chunk_bytes: usize,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            record_raw_media: false,
            progress_chunk_bytes: 64 * 1024,
        }
    }
}

impl ConsoleConfig {
    /// Load from the default file and environment.
    pub fn load() -> ConsoleResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and environment.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> ConsoleResult<Self> {
        let config = Self::figment(path.as_ref()).extract()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(ConsoleConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).map(|key| key.as_str().replacen('_', ".", 1).into()))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> ConsoleResult<()> {
        let invalid = |msg: String| Err(ConsoleError::Configuration(msg));

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return invalid(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        if self.service.address.trim().is_empty() {
            return invalid("service.address must not be empty".to_string());
        }

        if self.service.event_buffer == 0 {
            return invalid("service.event_buffer must be at least 1".to_string());
        }

        let distance = self.calibration.reference_distance_m;
        if !(distance.is_finite() && distance > 0.0) {
            return invalid(format!(
                "Invalid reference_distance_m {distance}. Must be a positive distance in metres"
            ));
        }

        if self.recording.progress_chunk_bytes == 0 {
            return invalid("recording.progress_chunk_bytes must be at least 1".to_string());
        }

        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> ConsoleResult<String> {
        toml::to_string_pretty(self).map_err(|e| ConsoleError::Configuration(e.to_string()))
    }

    /// Write as TOML to `path`, creating parent directories.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> ConsoleResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }
}
