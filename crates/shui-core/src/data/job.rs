//! Print job state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Print job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum JobState {
    /// No job
    #[default]
    Idle,
    /// File transfer in progress
    Uploading,
    /// Printer is running the job
    Printing,
    /// Job paused by the user
    Paused,
    /// Stop and cooling sequence in progress
    Stopping,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Uploading => write!(f, "Uploading"),
            Self::Printing => write!(f, "Printing"),
            Self::Paused => write!(f, "Paused"),
            Self::Stopping => write!(f, "Stopping"),
        }
    }
}

/// Reason attached to the most recent transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobAnnotation {
    /// Progress reached 100% or the printer reported the job done
    Completed,
    /// Stopped by the user
    Stopped,
    /// Upload failed
    UploadFailed(String),
    /// Upload cancelled by the user
    UploadCancelled,
    /// No print activity within the grace window after upload
    NoActivityAfterUpload,
    /// Disconnect outlasted the threshold
    ConnectionLost,
}

impl fmt::Display for JobAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Stopped => write!(f, "stopped"),
            Self::UploadFailed(reason) => write!(f, "upload failed: {}", reason),
            Self::UploadCancelled => write!(f, "upload cancelled"),
            Self::NoActivityAfterUpload => write!(f, "printer did not start after upload"),
            Self::ConnectionLost => write!(f, "connection lost"),
        }
    }
}

/// Published job state with the context of its last transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    /// Current state
    pub state: JobState,
    /// Why the last transition happened, if notable
    pub annotation: Option<JobAnnotation>,
    /// File name of the active or last job
    pub file: Option<String>,
    /// When the state last changed
    pub changed_at: DateTime<Utc>,
}

impl JobSnapshot {
    /// Idle with no history
    pub fn idle() -> Self {
        Self {
            state: JobState::Idle,
            annotation: None,
            file: None,
            changed_at: Utc::now(),
        }
    }

    /// Successor snapshot in `state`
    pub fn transition(&self, state: JobState, annotation: Option<JobAnnotation>) -> Self {
        Self {
            state,
            annotation,
            file: self.file.clone(),
            changed_at: Utc::now(),
        }
    }
}

impl Default for JobSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}
