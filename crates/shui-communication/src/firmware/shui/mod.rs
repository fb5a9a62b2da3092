//! SHUI WiFi firmware
//!
//! Plain-text command port (Marlin-style G/M codes terminated by `\r\n`) and
//! the `/upload` HTTP endpoint.

pub mod commands;
pub mod gcode;
pub mod poller;
pub mod response_parser;
