//! Printer core facade
//!
//! [`PrinterCore`] wires the connection, command channel, status poller,
//! upload manager and job state machine together and is the only surface a
//! UI needs. Every background task it spawns is tied to one shutdown token.

use crate::communication::channel::{Command, CommandChannel, CommandResponse, CommandSource};
use crate::communication::tcp::{ConnectionConfig, ShuiConnection};
use crate::communication::upload::{UploadConfig, UploadHandle, UploadManager, UploadTask};
use crate::firmware::shui::poller::{PollerConfig, StatusPoller};
use crate::job::{JobConfig, PrintJobStateMachine};
use parking_lot::Mutex;
use shui_core::{
    AppEvent, ConnectionState, Error, EventBus, EventFilter, EventStream, JobSnapshot, JobState,
    PrinterSnapshot, Result, SubscriptionId, TerminalEvent, UploadOutcome,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Runtime settings for one printer
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Printer host name or IP
    pub printer_ip: String,
    /// Command port
    pub tcp_port: u16,
    /// Upload port
    pub http_port: u16,
    /// Deadline for opening the TCP session
    pub connect_timeout: Duration,
    /// Default per-command response deadline
    pub response_timeout: Duration,
    /// Silence that ends the welcome banner
    pub banner_timeout: Duration,
    /// Time between status polls
    pub poll_interval: Duration,
    /// Consecutive failed polls before an active job is abandoned
    pub disconnect_threshold: u32,
    /// Time allowed for a print to start after upload
    pub grace_window: Duration,
    /// Assumed upload throughput for ETA, bytes/sec
    pub upload_throughput_bps: u64,
    /// Minimum spacing between upload progress updates
    pub upload_progress_interval: Duration,
    /// Floor for the upload request deadline
    pub min_upload_read_timeout: Duration,
    /// Post-print cooling dwell; 0 disables it
    pub cooling_secs: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            printer_ip: "192.168.1.213".to_string(),
            tcp_port: 8080,
            http_port: 8080,
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(3),
            banner_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_secs(15),
            disconnect_threshold: 3,
            grace_window: Duration::from_secs(45),
            upload_throughput_bps: 80 * 1000,
            upload_progress_interval: Duration::from_millis(250),
            min_upload_read_timeout: Duration::from_secs(180),
            cooling_secs: 0,
        }
    }
}

impl CoreConfig {
    /// TCP session settings
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.printer_ip.clone(),
            port: self.tcp_port,
            connect_timeout: self.connect_timeout,
            banner_timeout: self.banner_timeout,
        }
    }

    /// Upload settings
    pub fn upload(&self) -> UploadConfig {
        UploadConfig {
            host: self.printer_ip.clone(),
            port: self.http_port,
            throughput_bps: self.upload_throughput_bps,
            progress_interval: self.upload_progress_interval,
            min_read_timeout: self.min_upload_read_timeout,
            connect_timeout: self.connect_timeout,
        }
    }

    /// Job policy settings
    pub fn job(&self) -> JobConfig {
        JobConfig {
            grace_window: self.grace_window,
            disconnect_threshold: self.disconnect_threshold,
            cooling_secs: self.cooling_secs,
            response_timeout: self.response_timeout,
        }
    }

    /// Poller settings
    pub fn poller(&self) -> PollerConfig {
        PollerConfig {
            interval: self.poll_interval,
        }
    }
}

/// The printer communication core
pub struct PrinterCore {
    config: CoreConfig,
    channel: CommandChannel,
    job: Arc<PrintJobStateMachine>,
    uploader: Arc<UploadManager>,
    events: Arc<EventBus>,
    snapshot_rx: watch::Receiver<PrinterSnapshot>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PrinterCore {
    /// Start the command channel and status poller
    ///
    /// Must be called inside a Tokio runtime. The first poll, and with it the
    /// first connection attempt, happens immediately.
    pub fn start(config: CoreConfig) -> Result<Self> {
        Self::start_with_bus(config, Arc::new(EventBus::new()))
    }

    /// Start with a caller-provided event bus
    pub fn start_with_bus(config: CoreConfig, events: Arc<EventBus>) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let connection = ShuiConnection::new(config.connection()).with_event_bus(events.clone());
        let (channel, channel_task) =
            CommandChannel::spawn(connection, config.response_timeout, shutdown.child_token());

        let uploader = Arc::new(UploadManager::new(config.upload(), events.clone())?);
        let job = Arc::new(PrintJobStateMachine::new(
            channel.clone(),
            config.job(),
            events.clone(),
        ));

        let (snapshot_tx, snapshot_rx) = watch::channel(PrinterSnapshot::new());
        let mut poller = StatusPoller::new(
            channel.clone(),
            config.poller(),
            snapshot_tx,
            events.clone(),
        );
        poller.add_listener(job.clone());
        let poller_task = tokio::spawn(poller.run(shutdown.child_token()));

        tracing::info!(
            "Printer core started for {}:{}",
            config.printer_ip,
            config.tcp_port
        );

        Ok(Self {
            config,
            channel,
            job,
            uploader,
            events,
            snapshot_rx,
            shutdown,
            tasks: Mutex::new(vec![channel_task, poller_task]),
        })
    }

    /// Settings this core was started with
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Latest printer snapshot
    pub fn snapshot(&self) -> PrinterSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Latest job state with annotation
    pub fn job(&self) -> JobSnapshot {
        self.job.snapshot()
    }

    /// Current job state
    pub fn job_state(&self) -> JobState {
        self.job.state()
    }

    /// Current TCP session state
    pub fn connection_state(&self) -> ConnectionState {
        self.channel.connection_state()
    }

    /// Send a raw command typed by the user
    ///
    /// Serialized with poller traffic; the reply is every line up to the
    /// acknowledgement.
    pub async fn send_terminal_command(&self, text: &str) -> Result<CommandResponse> {
        let line = text.trim();
        if line.is_empty() {
            return Err(Error::other("empty command"));
        }

        self.events
            .publish(AppEvent::Terminal(TerminalEvent::Sent(line.to_string())));
        match self
            .channel
            .submit(Command::new(line, CommandSource::UserTerminal))
            .await
        {
            Ok(response) => {
                self.events
                    .publish(AppEvent::Terminal(TerminalEvent::Received(
                        response.lines.clone(),
                    )));
                Ok(response)
            }
            Err(e) => {
                self.events
                    .publish(AppEvent::Terminal(TerminalEvent::Failed {
                        command: line.to_string(),
                        error: e.to_string(),
                    }));
                Err(e.into())
            }
        }
    }

    /// Upload `path` and start printing it
    ///
    /// Rejected unless the job is `Idle`. Returns once the transfer has
    /// started; the handle reports progress and the final outcome.
    pub async fn request_upload(&self, path: &Path) -> Result<UploadHandle> {
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let cancel = self.shutdown.child_token();
        self.job.begin_upload(&file, cancel.clone())?;

        let task = match UploadTask::from_file(path, self.config.cooling_secs, cancel).await {
            Ok(task) => task,
            Err(e) => {
                self.job.finish_upload(&UploadOutcome::Failed(e.to_string()));
                return Err(e.into());
            }
        };

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let handle = UploadHandle::new(&task, outcome_rx);
        let uploader = self.uploader.clone();
        let job = self.job.clone();

        let upload = tokio::spawn(async move {
            let outcome = uploader.upload(task).await;
            job.finish_upload(&outcome);
            let _ = outcome_tx.send(outcome);
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(upload);
        Ok(handle)
    }

    /// Cancel the upload in progress, if any
    pub fn cancel_upload(&self) -> bool {
        self.job.cancel_upload()
    }

    /// Pause the running print
    pub async fn pause(&self) -> Result<()> {
        self.job.pause().await
    }

    /// Resume a paused print
    pub async fn resume(&self) -> Result<()> {
        self.job.resume().await
    }

    /// Stop the print and run the cooling/motor-off sequence
    pub async fn stop(&self) -> Result<()> {
        self.job.stop().await
    }

    /// Register an event handler
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(AppEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(filter, handler)
    }

    /// Remove an event handler
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Stream of core events matching `filter`
    pub fn events(&self, filter: EventFilter) -> EventStream {
        self.events.stream(filter)
    }

    /// Observe published snapshots
    pub fn watch_snapshot(&self) -> watch::Receiver<PrinterSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Observe job transitions
    pub fn watch_job(&self) -> watch::Receiver<JobSnapshot> {
        self.job.subscribe()
    }

    /// Stop polling, cancel any upload, fail pending commands and close the
    /// socket, then wait for every task to finish
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!("Shutting down printer core");
        }
        self.shutdown.cancel();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("Background task ended abnormally: {}", e);
            }
        }
    }

    /// Whether [`shutdown`](Self::shutdown) has been requested
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for PrinterCore {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_views() {
        let config = CoreConfig {
            printer_ip: "10.0.0.5".to_string(),
            http_port: 80,
            cooling_secs: 30,
            ..Default::default()
        };

        let connection = config.connection();
        assert_eq!(connection.host, "10.0.0.5");
        assert_eq!(connection.port, 8080);

        let upload = config.upload();
        assert_eq!(upload.port, 80);
        assert_eq!(upload.throughput_bps, 80_000);

        let job = config.job();
        assert_eq!(job.cooling_secs, 30);
        assert_eq!(job.disconnect_threshold, 3);

        assert_eq!(config.poller().interval, Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_empty_terminal_command_rejected() {
        let core = PrinterCore::start(CoreConfig {
            printer_ip: "127.0.0.1".to_string(),
            tcp_port: 9,
            poll_interval: Duration::from_secs(3600),
            ..Default::default()
        })
        .expect("start");

        assert!(core.send_terminal_command("   ").await.is_err());
        core.shutdown().await;
        core.shutdown().await;
        assert!(core.is_shut_down());
    }

    #[tokio::test]
    async fn test_upload_of_missing_file_leaves_job_idle() {
        let core = PrinterCore::start(CoreConfig {
            printer_ip: "127.0.0.1".to_string(),
            tcp_port: 9,
            poll_interval: Duration::from_secs(3600),
            ..Default::default()
        })
        .expect("start");

        let err = core
            .request_upload(Path::new("/nonexistent/part.gcode"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upload(_)));
        assert_eq!(core.job_state(), JobState::Idle);
        core.shutdown().await;
    }
}
