//! # SHUI Print
//!
//! A WiFi client for 3D printers running the SHUI firmware:
//! - Live temperature and SD progress polling over the TCP command port
//! - G-code upload over HTTP with progress, ETA, and cancellation
//! - Pause, resume, and stop with an optional post-print cooling dwell
//! - A raw command terminal sharing the same serialized session
//!
//! ## Architecture
//!
//! SHUI Print is organized as a workspace with multiple crates:
//!
//! 1. **shui-core** - Snapshot and job types, errors, event bus
//! 2. **shui-communication** - TCP session, command channel, poller, uploads, job state machine
//! 3. **shui-settings** - Config files and upload history
//! 4. **shui-print** - Console binary that integrates all crates

pub mod console;

pub use shui_communication::{
    CommandResponse, CoreConfig, PrinterCore, UploadHandle,
};
pub use shui_core::{
    AppEvent, ConnectionEvent, ConnectionState, Error, EventCategory, EventFilter, EventStream,
    JobAnnotation, JobSnapshot, JobState, PrintActivity, PrinterSnapshot, Result, UploadOutcome,
    UploadProgress,
};
pub use shui_settings::{Config, HistoryEntry, UploadHistory};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable multi-line output
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Directive used when `RUST_LOG` does not say otherwise
pub fn default_directive(verbosity: u8) -> tracing::Level {
    match verbosity {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

/// Filter from `RUST_LOG` directives, or from `verbosity` when they are absent
pub fn log_filter(verbosity: u8, rust_log: Option<&str>) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::builder()
        .with_default_directive(default_directive(verbosity).into())
        .parse_lossy(rust_log.unwrap_or_default())
}

/// Initialize logging
///
/// Sets up structured logging with:
/// - Console output (stderr, so it stays apart from command output)
/// - RUST_LOG environment variable support
/// - `-v` raising the level to debug, `-vv` to trace, when RUST_LOG is unset
pub fn init_logging(verbosity: u8, format: LogFormat) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let env_filter = log_filter(verbosity, rust_log.as_deref());

    match format {
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_line_number(true)
                .pretty();

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .json();

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
    }

    Ok(())
}
