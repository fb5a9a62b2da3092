//! # Event Bus Module
//!
//! Publish/subscribe distribution of core events to external collaborators.
//!
//! - Publishers emit typed events without knowing subscribers
//! - Subscribers filter by category and receive events of interest
//! - Synchronous handlers and async [`EventStream`]s are both supported
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shui_core::event_bus::{AppEvent, EventBus, EventCategory, EventFilter};
//!
//! let bus = EventBus::new();
//! let subscription = bus.subscribe(
//!     EventFilter::only(EventCategory::Job),
//!     |event| {
//!         if let AppEvent::Job(job) = event {
//!             println!("Job is now {}", job.state);
//!         }
//!     },
//! );
//!
//! bus.unsubscribe(subscription);
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
