//! SHUI Print Settings Crate
//!
//! Handles the printer configuration file and the upload history log.

pub mod config;
pub mod error;
pub mod history;

pub use config::{Config, JobSettings, PollingSettings, PrinterSettings, UploadSettings};
pub use error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
pub use history::{HistoryEntry, UploadHistory, MAX_HISTORY_ENTRIES};
