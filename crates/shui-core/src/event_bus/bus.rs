//! Event bus owned by one printer core
//!
//! Handlers run on the publishing task after the handler table lock has been
//! released, so a handler may subscribe or unsubscribe. Async consumers take
//! an [`EventStream`], which filters by category and keeps going after a lag.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use uuid::Uuid;

use super::events::{AppEvent, EventCategory};

/// Queue depth for async consumers; upload progress is the busiest source
const STREAM_CAPACITY: usize = 256;

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0.simple())
    }
}

/// Which events a handler or stream receives
#[derive(Debug, Clone, Default)]
pub enum EventFilter {
    #[default]
    All,
    Categories(Vec<EventCategory>),
}

impl EventFilter {
    /// Filter for a single category
    pub fn only(category: EventCategory) -> Self {
        EventFilter::Categories(vec![category])
    }

    pub fn matches(&self, event: &AppEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Categories(categories) => categories.contains(&event.category()),
        }
    }
}

type Handler = Arc<dyn Fn(AppEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    filter: EventFilter,
    handler: Handler,
}

/// Publish/subscribe hub for snapshot, job, connection, upload and terminal events
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(STREAM_CAPACITY)
    }

    /// Bus whose streams buffer up to `capacity` events before lagging
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    /// Deliver `event` to matching handlers, then to open streams
    ///
    /// Returns the number of streams the event reached.
    pub fn publish(&self, event: AppEvent) -> usize {
        tracing::trace!("Publishing {}", event.description());

        let handlers: Vec<Handler> = self
            .subscriptions
            .read()
            .iter()
            .filter(|sub| sub.filter.matches(&event))
            .map(|sub| sub.handler.clone())
            .collect();
        for handler in handlers {
            handler(event.clone());
        }

        self.sender.send(event).unwrap_or(0)
    }

    /// Register a handler; it runs on the publishing task and should return quickly
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(AppEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        self.subscriptions.write().push(Subscription {
            id,
            filter,
            handler: Arc::new(handler),
        });
        tracing::debug!("Subscription {} added", id);
        id
    }

    /// Remove a handler; false when `id` is unknown
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|sub| sub.id != id);
        let removed = subscriptions.len() != before;
        if removed {
            tracing::debug!("Subscription {} removed", id);
        }
        removed
    }

    /// Open a stream of events published from now on
    pub fn stream(&self, filter: EventFilter) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
            filter,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.subscriptions.read().len())
            .field("streams", &self.sender.receiver_count())
            .finish()
    }
}

/// Filtered event feed for async consumers
///
/// A consumer that falls behind loses the oldest events; the loss is logged
/// and the stream continues with the next event.
pub struct EventStream {
    receiver: broadcast::Receiver<AppEvent>,
    filter: EventFilter,
}

impl EventStream {
    /// Next matching event; `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<AppEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event stream lagged; {} events dropped", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already queued, without waiting
    pub fn try_recv(&mut self) -> Option<AppEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("Event stream lagged; {} events dropped", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}
