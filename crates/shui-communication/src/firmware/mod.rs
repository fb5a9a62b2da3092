//! Firmware dialects
//!
//! Only the SHUI WiFi firmware dialect is supported.

pub mod shui;
