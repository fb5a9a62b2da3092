//! Data models for printer state
//!
//! Everything here is an immutable value: snapshots are replaced wholesale on
//! each poll and never partially mutated by readers.

mod job;
mod upload;

pub use job::{JobAnnotation, JobSnapshot, JobState};
pub use upload::{UploadOutcome, UploadProgress};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A heater reading: current and target temperature in °C
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    /// Measured temperature
    pub current: f64,
    /// Set point
    pub target: f64,
}

impl Temperature {
    /// Create a new temperature reading
    pub fn new(current: f64, target: f64) -> Self {
        Self { current, target }
    }
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}/{:.1}°C", self.current, self.target)
    }
}

/// SD print activity as reported by the progress query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PrintActivity {
    /// No progress report seen yet
    #[default]
    Unknown,
    /// Printer reports it is not SD printing
    NotPrinting,
    /// Printer reports an active SD print
    Printing,
    /// Printer reports a paused SD print
    Paused,
}

impl fmt::Display for PrintActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::NotPrinting => write!(f, "Not printing"),
            Self::Printing => write!(f, "Printing"),
            Self::Paused => write!(f, "Paused"),
        }
    }
}

/// TCP session state, owned by the connection manager
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No socket
    #[default]
    Disconnected,
    /// Connect in progress
    Connecting,
    /// Socket open and banner drained
    Connected,
    /// Last I/O operation failed; socket discarded
    Faulted(String),
}

impl ConnectionState {
    /// Whether a live session exists
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Faulted(reason) => write!(f, "Faulted: {}", reason),
        }
    }
}

/// Point-in-time view of the printer
///
/// Produced by the status poller once per tick. A failed poll produces a copy
/// of the previous snapshot with `connected = false`, so temperatures and
/// progress never regress to defaults because of a single failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterSnapshot {
    /// Poll tick that produced this snapshot
    pub sequence: u64,
    /// Publication time
    pub timestamp: DateTime<Utc>,
    /// Whether the poll that produced this snapshot succeeded
    pub connected: bool,
    /// TCP session state when the poll finished
    ///
    /// A failed poll on a `Connected` session is a slow reply, not a disconnect.
    #[serde(default)]
    pub session: ConnectionState,
    /// Hotend temperature
    pub hotend: Option<Temperature>,
    /// Bed temperature
    pub bed: Option<Temperature>,
    /// Print progress 0-100, `None` when unknown
    pub progress: Option<u8>,
    /// Raw SD byte counters (done, total)
    pub sd_bytes: Option<(u64, u64)>,
    /// SD print activity
    pub activity: PrintActivity,
    /// Time since printing was first observed
    pub elapsed: Option<Duration>,
    /// Extrapolated time to completion
    pub remaining: Option<Duration>,
}

impl PrinterSnapshot {
    /// Create an empty, disconnected snapshot
    pub fn new() -> Self {
        Self {
            sequence: 0,
            timestamp: Utc::now(),
            connected: false,
            session: ConnectionState::Disconnected,
            hotend: None,
            bed: None,
            progress: None,
            sd_bytes: None,
            activity: PrintActivity::Unknown,
            elapsed: None,
            remaining: None,
        }
    }

    /// Builder method to stamp the snapshot with its tick and time
    pub fn with_sequence(mut self, sequence: u64, timestamp: DateTime<Utc>) -> Self {
        self.sequence = sequence;
        self.timestamp = timestamp;
        self
    }

    /// Builder method to set connectivity
    pub fn with_connected(mut self, connected: bool) -> Self {
        self.connected = connected;
        self
    }

    /// Builder method to record the session state
    pub fn with_session(mut self, session: ConnectionState) -> Self {
        self.session = session;
        self
    }

    /// Builder method to set the hotend reading
    pub fn with_hotend(mut self, hotend: Temperature) -> Self {
        self.hotend = Some(hotend);
        self
    }

    /// Builder method to set the bed reading
    pub fn with_bed(mut self, bed: Temperature) -> Self {
        self.bed = Some(bed);
        self
    }

    /// Builder method to set progress and activity
    pub fn with_progress(mut self, progress: Option<u8>, activity: PrintActivity) -> Self {
        self.progress = progress.map(|p| p.min(100));
        self.activity = activity;
        self
    }

    /// Builder method to set raw SD byte counters
    pub fn with_sd_bytes(mut self, done: u64, total: u64) -> Self {
        self.sd_bytes = Some((done, total));
        self
    }

    /// Builder method to set elapsed and remaining time
    pub fn with_timing(mut self, elapsed: Option<Duration>, remaining: Option<Duration>) -> Self {
        self.elapsed = elapsed;
        self.remaining = remaining;
        self
    }

    /// Copy of this snapshot marking a failed poll
    ///
    /// Last-known temperatures and progress are preserved.
    pub fn disconnected(&self, sequence: u64, timestamp: DateTime<Utc>) -> Self {
        self.clone()
            .with_sequence(sequence, timestamp)
            .with_connected(false)
    }

    /// Whether this snapshot should replace `other` when published
    ///
    /// Ordering is by poll tick. The wall-clock timestamp only breaks ties, so a
    /// clock stepping backwards never makes fresh snapshots look stale.
    pub fn supersedes(&self, other: &PrinterSnapshot) -> bool {
        (self.sequence, self.timestamp) >= (other.sequence, other.timestamp)
    }

    /// Whether the printer reports a finished SD job
    pub fn is_complete(&self) -> bool {
        self.activity == PrintActivity::Printing && self.progress == Some(100)
    }
}

impl Default for PrinterSnapshot {
    fn default() -> Self {
        Self::new()
    }
}
