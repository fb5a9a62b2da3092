//! Transport layer
//!
//! - [`tcp`]: the single TCP session to the printer
//! - [`channel`]: the FIFO command mediator that owns that session
//! - [`upload`]: HTTP multipart transfers on their own connection

pub mod channel;
pub mod tcp;
pub mod upload;
