use serde::Deserialize;
use std::path::Path;
use tracing::warn;

use crate::scan::AutoScanInterval;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub auto_scan: AutoScanConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub cameras: Vec<CameraConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// e.g. "http://localhost:8000"
    pub base_url: String,
    #[serde(default = "default_scan_path")]
    pub scan_path: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_max_side")]
    pub max_side: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_ideal_width")]
    pub ideal_width: u32,
    #[serde(default = "default_ideal_height")]
    pub ideal_height: u32,
    /// Give up on a camera that has not started streaming by then.
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AutoScanConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

/// A network MJPEG camera exposed as a selectable capture device.
#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_side: default_max_side(),
            jpeg_quality: default_jpeg_quality(),
            ideal_width: default_ideal_width(),
            ideal_height: default_ideal_height(),
            open_timeout_secs: default_open_timeout_secs(),
        }
    }
}

impl Default for AutoScanConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: default_interval_ms(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AutoScanConfig {
    pub fn interval(&self) -> Result<AutoScanInterval, ConfigError> {
        AutoScanInterval::try_from(self.interval_ms)
            .map_err(|e| ConfigError::Invalid(format!("auto_scan.interval_ms: {e}")))
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.auto_scan.interval()?;
        if self.capture.max_side == 0 {
            return Err(ConfigError::Invalid("capture.max_side must be > 0".into()));
        }
        if self.capture.open_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "capture.open_timeout_secs must be > 0".into(),
            ));
        }
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(ConfigError::Invalid(
                "capture.jpeg_quality must be within 1..=100".into(),
            ));
        }
        if self.cameras.is_empty() {
            warn!("no [[cameras]] configured, scanner will start without a device");
        }
        if let Some(dup) = self
            .cameras
            .iter()
            .enumerate()
            .find(|(i, c)| self.cameras[..*i].iter().any(|o| o.id == c.id))
        {
            return Err(ConfigError::Invalid(format!(
                "duplicate camera id {}",
                dup.1.id
            )));
        }
        Ok(())
    }

    /// Full URL of the recognition endpoint.
    pub fn scan_url(&self) -> String {
        format!(
            "{}{}",
            self.api.base_url.trim_end_matches('/'),
            self.api.scan_path
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_scan_path() -> String {
    "/api/attendance/scan".into()
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_max_side() -> u32 {
    720
}
fn default_jpeg_quality() -> u8 {
    90
}
fn default_ideal_width() -> u32 {
    1280
}
fn default_ideal_height() -> u32 {
    720
}
fn default_open_timeout_secs() -> u64 {
    10
}

fn default_interval_ms() -> u64 {
    3500
}
fn default_listen() -> String {
    "127.0.0.1:8090".into()
}
fn default_log_level() -> String {
    "info".into()
}
