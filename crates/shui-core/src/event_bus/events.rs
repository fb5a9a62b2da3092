//! Event type definitions for the event bus.
//!
//! Events are cloneable and serializable so observers can log or replay them.

use serde::{Deserialize, Serialize};

use crate::data::{ConnectionState, JobSnapshot, PrinterSnapshot, UploadOutcome, UploadProgress};

/// Root event enum for all core events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AppEvent {
    /// A new printer snapshot was published
    Snapshot(PrinterSnapshot),
    /// The job state changed
    Job(JobSnapshot),
    /// TCP session events
    Connection(ConnectionEvent),
    /// File transfer events
    Upload(UploadEvent),
    /// Terminal traffic
    Terminal(TerminalEvent),
}

impl AppEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            AppEvent::Snapshot(_) => EventCategory::Snapshot,
            AppEvent::Job(_) => EventCategory::Job,
            AppEvent::Connection(_) => EventCategory::Connection,
            AppEvent::Upload(_) => EventCategory::Upload,
            AppEvent::Terminal(_) => EventCategory::Terminal,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            AppEvent::Snapshot(s) => format!(
                "Snapshot #{} (connected: {}, progress: {:?})",
                s.sequence, s.connected, s.progress
            ),
            AppEvent::Job(j) => match &j.annotation {
                Some(note) => format!("Job {} ({})", j.state, note),
                None => format!("Job {}", j.state),
            },
            AppEvent::Connection(e) => e.description(),
            AppEvent::Upload(e) => e.description(),
            AppEvent::Terminal(e) => e.description(),
        }
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Printer snapshots.
    Snapshot,
    /// Job state changes.
    Job,
    /// TCP session events.
    Connection,
    /// Upload progress and outcomes.
    Upload,
    /// Terminal command traffic.
    Terminal,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Snapshot => write!(f, "Snapshot"),
            EventCategory::Job => write!(f, "Job"),
            EventCategory::Connection => write!(f, "Connection"),
            EventCategory::Upload => write!(f, "Upload"),
            EventCategory::Terminal => write!(f, "Terminal"),
        }
    }
}

/// Connection-related events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConnectionEvent {
    /// Connection state changed.
    StateChanged {
        /// Address of the printer.
        address: String,
        /// New state.
        state: ConnectionState,
    },
}

impl ConnectionEvent {
    fn description(&self) -> String {
        match self {
            ConnectionEvent::StateChanged { address, state } => {
                format!("{}: {}", address, state)
            }
        }
    }
}

/// Upload-related events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UploadEvent {
    /// Transfer started.
    Started {
        /// File name sent to the printer.
        file: String,
        /// Body size in bytes.
        total_bytes: u64,
    },
    /// Rate-limited progress update.
    Progress(UploadProgress),
    /// Transfer finished.
    Finished {
        /// File name sent to the printer.
        file: String,
        /// Result of the transfer.
        outcome: UploadOutcome,
    },
}

impl UploadEvent {
    fn description(&self) -> String {
        match self {
            UploadEvent::Started { file, total_bytes } => {
                format!("Uploading {} ({} bytes)", file, total_bytes)
            }
            UploadEvent::Progress(p) => format!("Upload {}%", p.percent()),
            UploadEvent::Finished { file, outcome } => {
                format!("Upload of {} finished: {:?}", file, outcome)
            }
        }
    }
}

/// Terminal traffic events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TerminalEvent {
    /// A user command was sent.
    Sent(String),
    /// Response lines for a user command.
    Received(Vec<String>),
    /// A user command failed.
    Failed {
        /// The command line.
        command: String,
        /// Failure description.
        error: String,
    },
}

impl TerminalEvent {
    fn description(&self) -> String {
        match self {
            TerminalEvent::Sent(line) => format!(">> {}", line),
            TerminalEvent::Received(lines) => format!("<< {}", lines.join(" | ")),
            TerminalEvent::Failed { command, error } => format!("{} failed: {}", command, error),
        }
    }
}
