//! Configuration management for the SHUI printer client
//!
//! Provides configuration file handling and validation. Supports JSON and
//! TOML file formats, chosen by file extension.
//!
//! Configuration is organized into logical sections:
//! - Printer settings (address, ports, timeouts)
//! - Polling settings (interval, disconnect policy)
//! - Upload settings (throughput estimate, progress rate, deadlines)
//! - Job defaults (post-print cooling)

use crate::error::{ConfigError, SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use shui_communication::CoreConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Printer connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrinterSettings {
    /// Printer IP address or host name
    pub printer_ip: String,
    /// Command port
    pub tcp_port: u16,
    /// Upload port
    pub http_port: u16,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Default response timeout in milliseconds
    pub response_timeout_ms: u64,
    /// Silence that ends the welcome banner, in milliseconds
    pub banner_timeout_ms: u64,
}

impl Default for PrinterSettings {
    fn default() -> Self {
        Self {
            printer_ip: "192.168.1.213".to_string(),
            tcp_port: 8080,
            http_port: 8080,
            connect_timeout_ms: 5000,
            response_timeout_ms: 3000,
            banner_timeout_ms: 1000,
        }
    }
}

/// Status polling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    /// Seconds between status polls
    pub poll_interval_secs: u64,
    /// Consecutive failed polls that abandon an active job
    pub disconnect_threshold: u32,
    /// Seconds a print may take to start after upload
    pub grace_window_secs: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            disconnect_threshold: 3,
            grace_window_secs: 45,
        }
    }
}

/// Upload settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Assumed throughput for the ETA, in kB/s
    pub upload_speed_kbs: u64,
    /// Minimum spacing between progress updates in milliseconds
    pub progress_interval_ms: u64,
    /// Lower bound on the upload request deadline in seconds
    pub min_read_timeout_secs: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            upload_speed_kbs: 80,
            progress_interval_ms: 250,
            min_read_timeout_secs: 180,
        }
    }
}

/// Print job defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    /// Part-cooling dwell added after printing; 0 disables it
    pub default_cooling_secs: u32,
}

/// Complete application configuration
///
/// Aggregates all settings sections and provides file I/O operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory offered for G-code files
    pub projects_dir: PathBuf,
    /// Upload history file
    pub history_file: PathBuf,
    /// Printer settings
    pub printer: PrinterSettings,
    /// Polling settings
    pub polling: PollingSettings,
    /// Upload settings
    pub upload: UploadSettings,
    /// Job defaults
    pub job: JobSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            projects_dir: PathBuf::from("projects"),
            history_file: PathBuf::from("history.json"),
            printer: PrinterSettings::default(),
            polling: PollingSettings::default(),
            upload: UploadSettings::default(),
            job: JobSettings::default(),
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform config directory for this application
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("shui-print"))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// History file, resolved against the config directory when relative
    pub fn history_path(&self) -> PathBuf {
        if self.history_file.is_absolute() {
            self.history_file.clone()
        } else {
            Self::config_dir().join(&self.history_file)
        }
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SettingsError::LoadError(format!("{}: {}", path.display(), e))
        })?;

        let config: Self = match Format::of(path)? {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load config from file, falling back to defaults if it does not exist
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if !path.exists() {
            tracing::info!("No config at {}; using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from_file(path)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match Format::of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| SettingsError::ConfigDirectory(e.to_string()))?;
        }
        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        if self.printer.printer_ip.trim().is_empty() {
            return Err(SettingsError::invalid("printer.printer_ip", "must not be empty"));
        }

        if self.printer.tcp_port == 0 {
            return Err(SettingsError::invalid("printer.tcp_port", "must be > 0"));
        }

        if self.printer.http_port == 0 {
            return Err(SettingsError::invalid("printer.http_port", "must be > 0"));
        }

        for (key, value) in [
            ("printer.connect_timeout_ms", self.printer.connect_timeout_ms),
            ("printer.response_timeout_ms", self.printer.response_timeout_ms),
            ("printer.banner_timeout_ms", self.printer.banner_timeout_ms),
            ("polling.poll_interval_secs", self.polling.poll_interval_secs),
            ("polling.grace_window_secs", self.polling.grace_window_secs),
            ("upload.progress_interval_ms", self.upload.progress_interval_ms),
            ("upload.min_read_timeout_secs", self.upload.min_read_timeout_secs),
        ] {
            if value == 0 {
                return Err(SettingsError::invalid(key, "must be > 0"));
            }
        }

        if self.polling.disconnect_threshold < 1 {
            return Err(SettingsError::invalid(
                "polling.disconnect_threshold",
                "must be at least 1",
            ));
        }

        if self.upload.upload_speed_kbs == 0 {
            return Err(SettingsError::invalid("upload.upload_speed_kbs", "must be > 0"));
        }

        Ok(())
    }

    /// Runtime settings for the printer core
    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            printer_ip: self.printer.printer_ip.trim().to_string(),
            tcp_port: self.printer.tcp_port,
            http_port: self.printer.http_port,
            connect_timeout: Duration::from_millis(self.printer.connect_timeout_ms),
            response_timeout: Duration::from_millis(self.printer.response_timeout_ms),
            banner_timeout: Duration::from_millis(self.printer.banner_timeout_ms),
            poll_interval: Duration::from_secs(self.polling.poll_interval_secs),
            disconnect_threshold: self.polling.disconnect_threshold,
            grace_window: Duration::from_secs(self.polling.grace_window_secs),
            upload_throughput_bps: self.upload.upload_speed_kbs * 1000,
            upload_progress_interval: Duration::from_millis(self.upload.progress_interval_ms),
            min_upload_read_timeout: Duration::from_secs(self.upload.min_read_timeout_secs),
            cooling_secs: self.job.default_cooling_secs,
        }
    }
}

enum Format {
    Json,
    Toml,
}

impl Format {
    fn of(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("toml") => Ok(Self::Toml),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("(none)").to_string(),
            )),
        }
    }
}
