//! # SHUI Print Core
//!
//! Core types shared by every layer of the SHUI printer client: the error
//! hierarchy, the immutable printer/job data model, and the event bus used to
//! publish snapshot and job-state changes to observers.

pub mod data;
pub mod error;
pub mod event_bus;

pub use data::{
    ConnectionState, JobAnnotation, JobSnapshot, JobState, PrintActivity, PrinterSnapshot,
    Temperature, UploadOutcome, UploadProgress,
};

pub use error::{CommandError, Error, JobError, ParseError, Result, UploadError};

pub use event_bus::{
    AppEvent, ConnectionEvent, EventBus, EventCategory, EventFilter, EventStream,
    SubscriptionId, TerminalEvent, UploadEvent,
};
