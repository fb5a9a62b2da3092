//! Upload progress and outcome

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bytes transferred so far, with a display-only ETA
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UploadProgress {
    /// Bytes handed to the HTTP body so far
    pub bytes_sent: u64,
    /// Total body size
    pub total_bytes: u64,
    /// Estimated time remaining at the configured throughput
    pub eta: Option<Duration>,
}

impl UploadProgress {
    /// Compute progress and ETA from the configured throughput (bytes/sec)
    pub fn new(bytes_sent: u64, total_bytes: u64, throughput_bps: u64) -> Self {
        let remaining = total_bytes.saturating_sub(bytes_sent);
        let eta = (throughput_bps > 0)
            .then(|| Duration::from_secs_f64(remaining as f64 / throughput_bps as f64));
        Self {
            bytes_sent,
            total_bytes,
            eta,
        }
    }

    /// Percentage transferred, rounded down
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        ((self.bytes_sent.min(self.total_bytes) * 100) / self.total_bytes) as u8
    }

    /// Whether every byte has been sent
    pub fn is_complete(&self) -> bool {
        self.bytes_sent >= self.total_bytes
    }
}

/// Terminal result of an upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UploadOutcome {
    /// The printer accepted the file
    Completed {
        /// Bytes transferred
        bytes: u64,
        /// Wall time of the transfer
        elapsed: Duration,
    },
    /// Transfer or printer-side failure
    Failed(String),
    /// Cancelled before completion
    Cancelled,
}

impl UploadOutcome {
    /// Whether the upload succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Measured average throughput in bytes/sec for a completed upload
    pub fn throughput_bps(&self) -> Option<f64> {
        match self {
            Self::Completed { bytes, elapsed } => {
                Some(*bytes as f64 / elapsed.as_secs_f64().max(0.1))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eta_from_throughput() {
        let progress = UploadProgress::new(20_000, 100_000, 80_000);
        assert_eq!(progress.eta, Some(Duration::from_secs(1)));
        assert_eq!(progress.percent(), 20);
        assert!(!progress.is_complete());
    }

    #[test]
    fn test_eta_without_throughput() {
        let progress = UploadProgress::new(0, 100, 0);
        assert_eq!(progress.eta, None);
    }

    #[test]
    fn test_empty_file_is_complete() {
        let progress = UploadProgress::new(0, 0, 80_000);
        assert_eq!(progress.percent(), 100);
        assert!(progress.is_complete());
    }

    #[test]
    fn test_outcome_throughput() {
        let outcome = UploadOutcome::Completed {
            bytes: 10_000,
            elapsed: Duration::from_secs(2),
        };
        assert!(outcome.is_success());
        assert_eq!(outcome.throughput_bps(), Some(5_000.0));
        assert_eq!(UploadOutcome::Cancelled.throughput_bps(), None);
    }
}
