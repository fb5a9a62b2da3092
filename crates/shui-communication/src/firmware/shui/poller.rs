//! Periodic status poller
//!
//! Once per interval the poller (re)connects if needed, submits the
//! temperature and progress queries through the command channel, merges the
//! decoded facts into a fresh [`PrinterSnapshot`], and publishes it. A failed
//! poll republishes the last-known values with `connected = false`.
//!
//! Reconnect attempts therefore happen at most once per tick.

use crate::communication::channel::{CommandChannel, CommandResponse};
use crate::firmware::shui::commands;
use crate::firmware::shui::response_parser::ShuiResponse;
use chrono::{DateTime, Utc};
use shui_core::{AppEvent, CommandError, EventBus, PrintActivity, PrinterSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Poller settings
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Time between polls
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
        }
    }
}

/// Receives every snapshot the poller publishes, in tick order
pub trait SnapshotListener: Send + Sync {
    /// Called after `snapshot` has been published
    fn on_snapshot(&self, snapshot: &PrinterSnapshot);
}

/// Status poller; the only source of unsolicited commands
pub struct StatusPoller {
    channel: CommandChannel,
    config: PollerConfig,
    snapshot_tx: watch::Sender<PrinterSnapshot>,
    events: Arc<EventBus>,
    listeners: Vec<Arc<dyn SnapshotListener>>,
    sequence: u64,
    printing_since: Option<Instant>,
}

impl StatusPoller {
    /// Create a poller publishing into `snapshot_tx`
    pub fn new(
        channel: CommandChannel,
        config: PollerConfig,
        snapshot_tx: watch::Sender<PrinterSnapshot>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            channel,
            config,
            snapshot_tx,
            events,
            listeners: Vec::new(),
            sequence: 0,
            printing_since: None,
        }
    }

    /// Register a listener called after each publication
    pub fn add_listener(&mut self, listener: Arc<dyn SnapshotListener>) {
        self.listeners.push(listener);
    }

    /// Poll until `shutdown` is cancelled
    ///
    /// The first poll runs immediately.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("Status poller started ({:?} interval)", self.config.interval);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        _ = self.poll_once() => {}
                    }
                }
            }
        }

        tracing::info!("Status poller stopped");
    }

    /// Run a single poll tick and return the published snapshot
    pub async fn poll_once(&mut self) -> PrinterSnapshot {
        self.sequence += 1;
        let sequence = self.sequence;
        let result = self.query().await;
        let now = Utc::now();
        let session = self.channel.connection_state();

        let snapshot = match result {
            Ok((temps, progress)) => self.merge(&temps, &progress, sequence, now),
            Err(e) => {
                tracing::warn!("Status poll #{} failed: {}", sequence, e);
                self.snapshot_tx.borrow().disconnected(sequence, now)
            }
        }
        .with_session(session);

        self.publish(snapshot.clone());
        snapshot
    }

    async fn query(&self) -> Result<(CommandResponse, CommandResponse), CommandError> {
        self.channel.ensure_connected().await?;
        let temps = self.channel.submit(commands::temperature_query()).await?;
        let progress = self.channel.submit(commands::progress_query()).await?;
        Ok((temps, progress))
    }

    fn merge(
        &mut self,
        temps: &CommandResponse,
        progress: &CommandResponse,
        sequence: u64,
        now: DateTime<Utc>,
    ) -> PrinterSnapshot {
        let mut snapshot = self
            .snapshot_tx
            .borrow()
            .clone()
            .with_sequence(sequence, now)
            .with_connected(true);

        for fact in temps.facts.iter().chain(progress.facts.iter()) {
            match fact {
                ShuiResponse::Temperature { hotend, bed, .. } => {
                    snapshot.hotend = hotend.merge(snapshot.hotend);
                    if let Some(bed) = bed {
                        snapshot.bed = bed.merge(snapshot.bed);
                    }
                }
                ShuiResponse::Progress(report) => {
                    snapshot.activity = PrintActivity::Printing;
                    if let (Some(done), Some(total)) = (report.done, report.total) {
                        snapshot.progress = report.percent();
                        snapshot.sd_bytes = Some((done, total));
                    }
                }
                ShuiResponse::SdPaused => snapshot.activity = PrintActivity::Paused,
                ShuiResponse::NotSdPrinting => {
                    snapshot.activity = PrintActivity::NotPrinting;
                    snapshot.progress = None;
                    snapshot.sd_bytes = None;
                }
                _ => {}
            }
        }

        match snapshot.activity {
            PrintActivity::Printing | PrintActivity::Paused => {
                let elapsed = self.printing_since.get_or_insert_with(Instant::now).elapsed();
                let remaining = snapshot.sd_bytes.and_then(|(done, total)| {
                    (done > 0).then(|| {
                        let left = total.saturating_sub(done) as f64;
                        Duration::from_secs_f64(elapsed.as_secs_f64() * left / done as f64)
                    })
                });
                snapshot.elapsed = Some(elapsed);
                snapshot.remaining = remaining;
            }
            PrintActivity::NotPrinting => {
                self.printing_since = None;
                snapshot.elapsed = None;
                snapshot.remaining = None;
            }
            PrintActivity::Unknown => {}
        }

        snapshot
    }

    fn publish(&self, snapshot: PrinterSnapshot) {
        let accepted = self.snapshot_tx.send_if_modified(|current| {
            if snapshot.supersedes(current) {
                *current = snapshot.clone();
                true
            } else {
                false
            }
        });

        if !accepted {
            tracing::debug!("Dropped stale snapshot #{}", snapshot.sequence);
            return;
        }

        self.events.publish(AppEvent::Snapshot(snapshot.clone()));
        for listener in &self.listeners {
            listener.on_snapshot(&snapshot);
        }
    }
}
