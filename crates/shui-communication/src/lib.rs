//! # SHUI Print Communication
//!
//! The printer communication core: a single serialized TCP command session,
//! a periodic status poller, an independent HTTP upload path, and the print
//! job state machine that ties them together behind [`PrinterCore`].

pub mod communication;
pub mod firmware;
pub mod job;
pub mod printer;

pub use communication::{
    channel::{Command, CommandChannel, CommandResponse, CommandSource, Terminator},
    tcp::{ConnectionConfig, ShuiConnection},
    upload::{UploadConfig, UploadHandle, UploadManager, UploadTask},
};

pub use firmware::shui::{
    commands, gcode,
    poller::{PollerConfig, SnapshotListener, StatusPoller},
    response_parser::{
        PositionReport, ProgressReport, ShuiResponse, ShuiResponseParser, TempReading,
    },
};

pub use job::{JobConfig, PrintJobStateMachine};
pub use printer::{CoreConfig, PrinterCore};
