//! G-code post-processing before upload
//!
//! The only rewrite performed is inserting a timed part-cooling block ahead of
//! the motor shutdown command, so the fan keeps running after the last layer.

use regex::Regex;
use std::sync::OnceLock;

/// Insert the cooling block before every `M84`
///
/// Works on raw bytes; lines other than the inserted block are copied
/// untouched, whatever their encoding. With no `M84` present, the block and
/// an `M84` are appended. `secs == 0` returns the input unchanged.
pub fn apply_cooling(gcode: &[u8], secs: u32) -> Vec<u8> {
    if secs == 0 {
        return gcode.to_vec();
    }

    let block = cooling_block(secs);
    let mut out = Vec::with_capacity(gcode.len() + block.len() * 2);
    let mut found = false;

    for line in gcode.split_inclusive(|b| *b == b'\n') {
        if is_motor_shutdown(line) {
            out.extend_from_slice(block.as_bytes());
            found = true;
        }
        out.extend_from_slice(line);
    }

    if !found {
        if out.last().is_some_and(|b| *b != b'\n') {
            out.push(b'\n');
        }
        out.extend_from_slice(block.as_bytes());
        out.extend_from_slice(b"M84\n");
    }
    out
}

fn cooling_block(secs: u32) -> String {
    format!(
        "; --- Cooling ---\nM106 S255\nG4 S{}\nM106 S0\n; ---\n",
        secs
    )
}

fn is_motor_shutdown(line: &[u8]) -> bool {
    line.trim_ascii()
        .strip_prefix(b"M84")
        .is_some_and(|rest| {
            !rest
                .first()
                .is_some_and(|c| c.is_ascii_alphanumeric() || *c == b'.')
        })
}

/// Slicer-reported print duration from the file header
///
/// Recognizes PrusaSlicer/OrcaSlicer (`; estimated printing time`), Cura
/// (`;TIME:`), and Simplify3D (`; Build time:`) comments.
pub fn estimated_print_time(text: &str) -> Option<String> {
    static PRUSA: OnceLock<Regex> = OnceLock::new();
    static CURA: OnceLock<Regex> = OnceLock::new();
    static S3D: OnceLock<Regex> = OnceLock::new();

    let prusa = PRUSA.get_or_init(|| {
        Regex::new(r"; estimated printing time \(normal mode\) = (.+)").expect("invalid regex pattern")
    });
    if let Some(caps) = prusa.captures(text) {
        return Some(caps[1].trim().to_string());
    }

    let cura = CURA.get_or_init(|| Regex::new(r";TIME:(\d+)").expect("invalid regex pattern"));
    if let Some(secs) = cura
        .captures(text)
        .and_then(|caps| caps[1].parse::<u64>().ok())
    {
        return Some(format_duration(secs));
    }

    let s3d = S3D.get_or_init(|| Regex::new(r"; Build time: (.+)").expect("invalid regex pattern"));
    s3d.captures(text).map(|caps| caps[1].trim().to_string())
}

fn format_duration(secs: u64) -> String {
    let (h, rest) = (secs / 3600, secs % 3600);
    let (m, s) = (rest / 60, rest % 60);

    let mut parts = Vec::new();
    if h > 0 {
        parts.push(format!("{}h", h));
    }
    if m > 0 {
        parts.push(format!("{}m", m));
    }
    if s > 0 || parts.is_empty() {
        parts.push(format!("{}s", s));
    }
    parts.join(" ")
}
