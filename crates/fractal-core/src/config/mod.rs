//! Configuration for the Fractal client.

pub mod settings;

use crate::telemetry::{DeviceSnapshot, DeviceTelemetry, StaticTelemetry, SysfsTelemetry, TransportSet};
use serde::{Deserialize, Serialize};
use settings::AdmissionPolicy;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Environment variable that overrides the configured device identifier.
pub const DEVICE_ID_ENV: &str = "FRACTAL_DEVICE_ID";

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Remote coordinator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl CoordinatorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Local client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub device_id: Option<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".fractal")
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self { data_dir: default_data_dir(), device_id: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetrySource {
    Sysfs,
    Static,
}

/// Where device state comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_source")]
    pub source: TelemetrySource,
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
    /// Snapshot reported when `source = "static"`.
    #[serde(default = "default_static_battery")]
    pub battery_percent: u8,
    #[serde(default = "default_true")]
    pub charging: bool,
    #[serde(default = "default_true")]
    pub wifi: bool,
    #[serde(default)]
    pub cellular: bool,
    #[serde(default)]
    pub interactive: bool,
}

fn default_telemetry_source() -> TelemetrySource {
    TelemetrySource::Sysfs
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys/class")
}

fn default_static_battery() -> u8 {
    100
}

fn default_true() -> bool {
    true
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            source: default_telemetry_source(),
            sysfs_root: default_sysfs_root(),
            battery_percent: default_static_battery(),
            charging: true,
            wifi: true,
            cellular: false,
            interactive: false,
        }
    }
}

impl TelemetryConfig {
    pub fn build(&self) -> Arc<dyn DeviceTelemetry> {
        match self.source {
            TelemetrySource::Sysfs => Arc::new(SysfsTelemetry::new(self.sysfs_root.clone())),
            TelemetrySource::Static => Arc::new(StaticTelemetry::new(DeviceSnapshot {
                battery_percent: self.battery_percent,
                charging: self.charging,
                transports: TransportSet { wifi: self.wifi, cellular: self.cellular },
                interactive: self.interactive,
                local_hour: None,
            })),
        }
    }
}

/// Root configuration for the client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub client: LocalConfig,
    /// Initial admission policy; settings saved through the settings store win.
    #[serde(default)]
    pub admission: AdmissionPolicy,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub log_level: Option<String>,
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(format!("Failed to serialize: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::ReadError(format!("Failed to create directory: {}", e)))?;
        }

        std::fs::write(path, content).map_err(|e| ConfigError::ReadError(format!("Failed to write: {}", e)))?;
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let url = self.coordinator.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(format!(
                "coordinator.base_url must be an http(s) URL, got {url:?}"
            )));
        }
        if self.coordinator.connect_timeout_secs == 0 || self.coordinator.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("coordinator timeouts must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn settings_path(&self) -> PathBuf {
        self.client.data_dir.join("settings.toml")
    }

    /// Device identifier: config, then `FRACTAL_DEVICE_ID`, then a UUID
    /// generated once and kept in `<data_dir>/device_id`.
    pub fn resolve_device_id(&self) -> ConfigResult<String> {
        if let Some(id) = self.client.device_id.as_deref().filter(|id| !id.trim().is_empty()) {
            return Ok(id.trim().to_string());
        }
        if let Ok(id) = std::env::var(DEVICE_ID_ENV)
            && !id.trim().is_empty()
        {
            return Ok(id.trim().to_string());
        }

        let path = self.client.data_dir.join("device_id");
        if let Ok(id) = std::fs::read_to_string(&path)
            && !id.trim().is_empty()
        {
            return Ok(id.trim().to_string());
        }

        let id = uuid::Uuid::new_v4().to_string();
        std::fs::create_dir_all(&self.client.data_dir)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", self.client.data_dir.display(), e)))?;
        std::fs::write(&path, &id).map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        info!(device_id = %id, "generated device id");
        Ok(id)
    }
}
