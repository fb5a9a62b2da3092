//! SHUI Response Parser
//!
//! Decodes single firmware lines into tagged facts: temperature reports,
//! SD progress, pause/idle status, positions, and acknowledgements. The parser
//! is stateless and never fails on malformed numbers; a bad field is reported
//! as unknown and recorded as a [`ParseError`] for diagnostics.

use regex::Regex;
use shui_core::{ParseError, PrintActivity, Temperature};
use std::fmt;
use std::sync::OnceLock;

/// Heater reading as parsed; `None` marks a field that failed to parse
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TempReading {
    /// Measured temperature
    pub current: Option<f64>,
    /// Set point
    pub target: Option<f64>,
}

impl TempReading {
    /// Merge into the previous reading, keeping previous values for unparsed fields
    pub fn merge(&self, previous: Option<Temperature>) -> Option<Temperature> {
        let current = self.current.or(previous.map(|p| p.current))?;
        let target = self
            .target
            .or(previous.map(|p| p.target))
            .unwrap_or_default();
        Some(Temperature::new(current, target))
    }
}

/// `SD printing byte <done>/<total>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressReport {
    /// Bytes of the file consumed
    pub done: Option<u64>,
    /// File size
    pub total: Option<u64>,
}

impl ProgressReport {
    /// Progress 0-100 rounded down, `None` if unknown or `total == 0`
    pub fn percent(&self) -> Option<u8> {
        match (self.done, self.total) {
            (Some(done), Some(total)) if total > 0 => {
                let pct = (u128::from(done) * 100 / u128::from(total)).min(100);
                Some(pct as u8)
            }
            _ => None,
        }
    }
}

/// M114 position report
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionReport {
    /// X axis
    pub x: Option<f64>,
    /// Y axis
    pub y: Option<f64>,
    /// Z axis
    pub z: Option<f64>,
    /// Extruder
    pub e: Option<f64>,
}

/// SHUI response types
#[derive(Debug, Clone, PartialEq)]
pub enum ShuiResponse {
    /// Bare acknowledgement
    Ok,
    /// Temperature report, possibly carried on an `ok` line
    Temperature {
        /// Hotend reading
        hotend: TempReading,
        /// Bed reading, absent for hotend-only reports
        bed: Option<TempReading>,
        /// Whether the line also acknowledged the command
        acknowledged: bool,
    },
    /// Active SD print progress
    Progress(ProgressReport),
    /// SD print paused
    SdPaused,
    /// No SD print running
    NotSdPrinting,
    /// Toolhead position
    Position(PositionReport),
    /// Anything else, passed through verbatim
    Message(String),
}

impl ShuiResponse {
    /// Whether this line completes a command
    pub fn is_ack(&self) -> bool {
        matches!(
            self,
            Self::Ok
                | Self::Temperature {
                    acknowledged: true,
                    ..
                }
        )
    }

    /// Whether this line carries a recognized fact
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Message(_))
    }

    /// Print activity implied by a progress-query reply
    pub fn activity(&self) -> Option<PrintActivity> {
        match self {
            Self::Progress(_) => Some(PrintActivity::Printing),
            Self::SdPaused => Some(PrintActivity::Paused),
            Self::NotSdPrinting => Some(PrintActivity::NotPrinting),
            _ => None,
        }
    }
}

impl fmt::Display for ShuiResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Temperature { hotend, bed, .. } => {
                write!(f, "temperature:hotend={:?}/{:?}", hotend.current, hotend.target)?;
                if let Some(bed) = bed {
                    write!(f, ",bed={:?}/{:?}", bed.current, bed.target)?;
                }
                Ok(())
            }
            Self::Progress(p) => write!(f, "progress:{:?}/{:?}", p.done, p.total),
            Self::SdPaused => write!(f, "sd:paused"),
            Self::NotSdPrinting => write!(f, "sd:idle"),
            Self::Position(p) => write!(f, "position:{:?},{:?},{:?}", p.x, p.y, p.z),
            Self::Message(msg) => write!(f, "message:{}", msg),
        }
    }
}

fn hotend_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bT0?:\s*([^\s/]*)\s*/\s*([^\s/]*)").expect("invalid regex pattern"))
}

fn bed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bB:\s*([^\s/]*)\s*/\s*([^\s/]*)").expect("invalid regex pattern"))
}

fn progress_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"SD printing byte\s+([^\s/]+)\s*/\s*([^\s/]+)").expect("invalid regex pattern")
    })
}

fn position_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"X:\s*(\S+)\s+Y:\s*(\S+)\s+Z:\s*(\S+)(?:\s+E:\s*(\S+))?")
            .expect("invalid regex pattern")
    })
}

/// SHUI response parser
#[derive(Debug, Clone, Copy, Default)]
pub struct ShuiResponseParser;

impl ShuiResponseParser {
    /// Create a new SHUI response parser
    pub fn new() -> Self {
        Self
    }

    /// Parse a firmware line, logging any malformed fields
    ///
    /// Returns `None` for blank lines.
    pub fn parse(&self, line: &str) -> Option<ShuiResponse> {
        let (response, anomalies) = self.parse_with_diagnostics(line);
        for anomaly in &anomalies {
            tracing::warn!("Parse anomaly in '{}': {}", line.trim(), anomaly);
        }
        response
    }

    /// Parse a firmware line and return malformed-field records alongside
    pub fn parse_with_diagnostics(&self, line: &str) -> (Option<ShuiResponse>, Vec<ParseError>) {
        let line = line.trim();
        let mut anomalies = Vec::new();

        if line.is_empty() {
            return (None, anomalies);
        }

        let is_ok = line.starts_with("ok");

        if let Some(caps) = hotend_regex().captures(line) {
            let hotend = TempReading {
                current: number(&caps[1], "hotend current", &mut anomalies),
                target: number(&caps[2], "hotend target", &mut anomalies),
            };
            let bed = bed_regex().captures(line).map(|caps| TempReading {
                current: number(&caps[1], "bed current", &mut anomalies),
                target: number(&caps[2], "bed target", &mut anomalies),
            });
            return (
                Some(ShuiResponse::Temperature {
                    hotend,
                    bed,
                    acknowledged: is_ok,
                }),
                anomalies,
            );
        }

        if let Some(caps) = progress_regex().captures(line) {
            let report = ProgressReport {
                done: number(&caps[1], "progress bytes", &mut anomalies),
                total: number(&caps[2], "progress total", &mut anomalies),
            };
            return (Some(ShuiResponse::Progress(report)), anomalies);
        }

        let lower = line.to_ascii_lowercase();
        if lower.contains("not sd printing") {
            return (Some(ShuiResponse::NotSdPrinting), anomalies);
        }
        if lower.contains("paused") {
            return (Some(ShuiResponse::SdPaused), anomalies);
        }

        if let Some(caps) = position_regex().captures(line) {
            let report = PositionReport {
                x: number(&caps[1], "x", &mut anomalies),
                y: number(&caps[2], "y", &mut anomalies),
                z: number(&caps[3], "z", &mut anomalies),
                e: caps
                    .get(4)
                    .and_then(|m| number(m.as_str(), "e", &mut anomalies)),
            };
            return (Some(ShuiResponse::Position(report)), anomalies);
        }

        if is_ok {
            return (Some(ShuiResponse::Ok), anomalies);
        }

        (Some(ShuiResponse::Message(line.to_string())), anomalies)
    }
}

fn number<T: std::str::FromStr>(
    raw: &str,
    field: &'static str,
    anomalies: &mut Vec<ParseError>,
) -> Option<T> {
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            anomalies.push(ParseError::MalformedNumber {
                field,
                raw: raw.to_string(),
            });
            None
        }
    }
}
