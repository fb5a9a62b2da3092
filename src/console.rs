//! Console command parsing and status formatting for the interactive client

use shui_core::{JobSnapshot, PrintActivity, PrinterSnapshot, Temperature, UploadProgress};
use shui_settings::HistoryEntry;
use std::path::PathBuf;
use std::time::Duration;

/// One line of console input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Print the latest snapshot
    Status,
    /// Upload a G-code file and start it
    Upload(PathBuf),
    /// Cancel the running upload
    Cancel,
    /// Pause the print
    Pause,
    /// Resume the print
    Resume,
    /// Stop the print
    Stop,
    /// Show the upload history
    History,
    /// Show the command list
    Help,
    /// Shut down
    Quit,
    /// Anything else, sent to the printer verbatim
    Raw(String),
}

impl ConsoleCommand {
    /// Parse a console line; blank lines yield `None`
    ///
    /// Keywords are case-insensitive. Raw commands keep their original text.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match (word.to_ascii_lowercase().as_str(), rest.is_empty()) {
            ("status", true) => Self::Status,
            ("upload", false) => Self::Upload(PathBuf::from(rest)),
            ("cancel", true) => Self::Cancel,
            ("pause", true) => Self::Pause,
            ("resume", true) => Self::Resume,
            ("stop", true) => Self::Stop,
            ("history", true) => Self::History,
            ("help", true) | ("?", true) => Self::Help,
            ("quit", true) | ("exit", true) => Self::Quit,
            _ => Self::Raw(line.to_string()),
        };
        Some(command)
    }
}

/// Console help text
pub const HELP: &str = "\
Commands:
  status          show printer status
  upload <path>   upload a G-code file and print it
  cancel          cancel the running upload
  pause | resume  pause or resume the print
  stop            stop the print
  history         show recent uploads
  quit            exit
Anything else is sent to the printer as a raw command (e.g. M105).";

fn temperature(label: &str, reading: Option<Temperature>) -> String {
    match reading {
        Some(t) => format!("{} {}", label, t),
        None => format!("{} --", label),
    }
}

/// `1h 02m 03s` style duration
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// One-line printer status
pub fn format_snapshot(snapshot: &PrinterSnapshot) -> String {
    if !snapshot.connected {
        return format!(
            "#{} offline | {} | {}",
            snapshot.sequence,
            temperature("hotend", snapshot.hotend),
            temperature("bed", snapshot.bed)
        );
    }

    let mut line = format!(
        "#{} {} | {}",
        snapshot.sequence,
        temperature("hotend", snapshot.hotend),
        temperature("bed", snapshot.bed)
    );

    match snapshot.activity {
        PrintActivity::Printing | PrintActivity::Paused => {
            let label = if snapshot.activity == PrintActivity::Paused {
                "paused"
            } else {
                "printing"
            };
            match snapshot.progress {
                Some(pct) => line.push_str(&format!(" | {} {}%", label, pct)),
                None => line.push_str(&format!(" | {}", label)),
            }
            if let Some(elapsed) = snapshot.elapsed {
                line.push_str(&format!(" | elapsed {}", format_duration(elapsed)));
            }
            if let Some(remaining) = snapshot.remaining {
                line.push_str(&format!(" | left ~{}", format_duration(remaining)));
            }
        }
        PrintActivity::NotPrinting => line.push_str(" | idle"),
        PrintActivity::Unknown => {}
    }
    line
}

/// Job state with its annotation
pub fn format_job(job: &JobSnapshot) -> String {
    let mut line = format!("job: {}", job.state);
    if let Some(file) = &job.file {
        line.push_str(&format!(" [{}]", file));
    }
    if let Some(note) = &job.annotation {
        line.push_str(&format!(" ({})", note));
    }
    line
}

/// Upload progress with ETA
pub fn format_progress(file: &str, progress: &UploadProgress) -> String {
    let mut line = format!(
        "upload {}: {}% ({}/{} bytes)",
        file,
        progress.percent(),
        progress.bytes_sent,
        progress.total_bytes
    );
    if let Some(eta) = progress.eta.filter(|_| !progress.is_complete()) {
        line.push_str(&format!(", ~{} left", format_duration(eta)));
    }
    line
}

/// History entry as a table row
pub fn format_history(entry: &HistoryEntry) -> String {
    let cooling = if entry.cooling > 0 {
        format!("cooling {}s", entry.cooling)
    } else {
        "no cooling".to_string()
    };
    format!(
        "{}  {}  {}  {}",
        entry.ts,
        if entry.success { "ok  " } else { "FAIL" },
        entry.file,
        cooling
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shui_core::{JobAnnotation, JobState};

    #[test]
    fn test_parse_keywords() {
        assert_eq!(ConsoleCommand::parse("  "), None);
        assert_eq!(ConsoleCommand::parse("status"), Some(ConsoleCommand::Status));
        assert_eq!(ConsoleCommand::parse("PAUSE"), Some(ConsoleCommand::Pause));
        assert_eq!(ConsoleCommand::parse("quit"), Some(ConsoleCommand::Quit));
        assert_eq!(
            ConsoleCommand::parse("upload  parts/cube 1.gcode "),
            Some(ConsoleCommand::Upload(PathBuf::from("parts/cube 1.gcode")))
        );
    }

    #[test]
    fn test_parse_raw_passthrough() {
        assert_eq!(
            ConsoleCommand::parse("M105"),
            Some(ConsoleCommand::Raw("M105".to_string()))
        );
        assert_eq!(
            ConsoleCommand::parse("upload"),
            Some(ConsoleCommand::Raw("upload".to_string()))
        );
        assert_eq!(
            ConsoleCommand::parse("stop now"),
            Some(ConsoleCommand::Raw("stop now".to_string()))
        );
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(5)), "5s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 05s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h 02m 03s");
    }

    #[test]
    fn test_format_snapshot() {
        let snapshot = PrinterSnapshot::new()
            .with_sequence(7, Utc::now())
            .with_connected(true)
            .with_hotend(Temperature::new(205.0, 210.0))
            .with_progress(Some(42), PrintActivity::Printing)
            .with_timing(Some(Duration::from_secs(600)), None);
        let line = format_snapshot(&snapshot);
        assert!(line.starts_with("#7 hotend"));
        assert!(line.contains("bed --"));
        assert!(line.contains("printing 42%"));
        assert!(line.contains("elapsed 10m 00s"));

        let offline = snapshot.disconnected(8, Utc::now());
        assert!(format_snapshot(&offline).contains("offline"));
    }

    #[test]
    fn test_format_job() {
        let job = JobSnapshot::idle()
            .transition(JobState::Idle, Some(JobAnnotation::ConnectionLost));
        let line = format_job(&job);
        assert!(line.starts_with("job: "));
        assert!(line.contains('('));
    }

    #[test]
    fn test_format_progress() {
        let progress = UploadProgress::new(40_000, 80_000, 80_000);
        let line = format_progress("cube.gcode", &progress);
        assert!(line.contains("50%"));
        assert!(line.contains("left"));
    }
}
