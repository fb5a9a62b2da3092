//! SHUI command vocabulary
//!
//! Builders for the commands the core issues on its own behalf. Each one
//! carries the terminator its reply is expected to end with.

use crate::communication::channel::{Command, CommandSource, Terminator};
use std::time::Duration;

/// Temperature report
pub const TEMPERATURE_QUERY: &str = "M105";
/// SD print progress
pub const PROGRESS_QUERY: &str = "M27";
/// Toolhead position
pub const POSITION_QUERY: &str = "M114";
/// Pause SD print
pub const PAUSE: &str = "M25";
/// Start or resume SD print
pub const RESUME: &str = "M24";
/// Stop SD print
pub const STOP: &str = "M26";
/// Part cooling fan to full
pub const FAN_FULL: &str = "M106 S255";
/// Part cooling fan off
pub const FAN_OFF: &str = "M106 S0";
/// Disable steppers; the final shutdown command
pub const DISABLE_MOTORS: &str = "M84";

/// Poller temperature query
pub fn temperature_query() -> Command {
    Command::new(TEMPERATURE_QUERY, CommandSource::Poller).with_terminator(Terminator::Recognized)
}

/// Poller progress query
///
/// SHUI may answer without a trailing `ok`, so any recognized line ends it.
pub fn progress_query() -> Command {
    Command::new(PROGRESS_QUERY, CommandSource::Poller).with_terminator(Terminator::Recognized)
}

/// Job control command answered by a single line
pub fn job_control(line: &str) -> Command {
    Command::new(line, CommandSource::JobControl).with_terminator(Terminator::FirstLine)
}

/// Timed cooling sequence run between stop and the final shutdown command
///
/// The dwell command gets its duration added to the response deadline.
pub fn cooling_sequence(secs: u32, response_timeout: Duration) -> Vec<Command> {
    if secs == 0 {
        return Vec::new();
    }
    vec![
        job_control(FAN_FULL),
        job_control(&format!("G4 S{}", secs))
            .with_timeout(response_timeout + Duration::from_secs(u64::from(secs))),
        job_control(FAN_OFF),
    ]
}
