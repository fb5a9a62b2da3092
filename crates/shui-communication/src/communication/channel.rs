//! Serialized command channel
//!
//! The printer has no request IDs, so replies are correlated by order alone.
//! [`CommandChannel`] accepts submissions from any task and feeds them to a
//! single worker that owns the [`ShuiConnection`]. The worker sends one
//! command, reads until that command's terminator or deadline, delivers the
//! result, and only then takes the next command from the FIFO.
//!
//! # Guarantees
//! - Commands are served strictly in submission order
//! - At most one command is ever in flight on the socket
//! - A timed-out command fails with [`CommandError::Timeout`] and frees the queue
//! - While disconnected, queued commands fail immediately with
//!   [`CommandError::NotConnected`]
//! - On shutdown, in-flight and queued commands fail with
//!   [`CommandError::ShuttingDown`] and the socket is closed once

use crate::communication::tcp::ShuiConnection;
use crate::firmware::shui::response_parser::{ShuiResponse, ShuiResponseParser};
use shui_core::{CommandError, ConnectionState};
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Maximum number of submissions waiting for the worker
const QUEUE_CAPACITY: usize = 100;

/// Who submitted a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSource {
    /// Periodic status poller
    Poller,
    /// Raw command typed by the user
    UserTerminal,
    /// Pause/resume/stop issued by the job state machine
    JobControl,
}

impl fmt::Display for CommandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poller => write!(f, "poller"),
            Self::UserTerminal => write!(f, "terminal"),
            Self::JobControl => write!(f, "job"),
        }
    }
}

/// Pattern that ends a command's reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// A line that is or starts with `ok`
    Ack,
    /// Any non-empty line
    FirstLine,
    /// An acknowledgement or any recognized fact
    Recognized,
}

impl Terminator {
    /// Whether `response` ends the reply
    pub fn matches(&self, response: &ShuiResponse) -> bool {
        match self {
            Self::Ack => response.is_ack(),
            Self::FirstLine => true,
            Self::Recognized => response.is_recognized(),
        }
    }
}

/// A request line with its reply terminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Text sent to the printer, without line terminator
    pub line: String,
    /// Reply terminator
    pub terminator: Terminator,
    /// Submitter
    pub source: CommandSource,
    /// Deadline override; the channel default applies when `None`
    pub timeout: Option<Duration>,
}

impl Command {
    /// Create a command terminated by an acknowledgement
    pub fn new(line: impl Into<String>, source: CommandSource) -> Self {
        Self {
            line: line.into().trim().to_string(),
            terminator: Terminator::Ack,
            source,
            timeout: None,
        }
    }

    /// Builder method to set the terminator
    pub fn with_terminator(mut self, terminator: Terminator) -> Self {
        self.terminator = terminator;
        self
    }

    /// Builder method to set the response deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Reply lines to one command, with their decoded facts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandResponse {
    /// Raw lines in arrival order
    pub lines: Vec<String>,
    /// Decoded facts, one per line
    pub facts: Vec<ShuiResponse>,
}

impl CommandResponse {
    /// Lines joined by newlines
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

type Reply<T> = oneshot::Sender<Result<T, CommandError>>;

enum Request {
    Execute {
        command: Command,
        reply: Reply<CommandResponse>,
    },
    Connect {
        reply: Reply<()>,
    },
}

/// Handle for submitting commands; cheap to clone
#[derive(Clone)]
pub struct CommandChannel {
    tx: mpsc::Sender<Request>,
    state: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
}

impl CommandChannel {
    /// Start the worker that owns `connection`
    ///
    /// The worker stops when `shutdown` is cancelled, failing anything still
    /// queued and closing the socket.
    pub fn spawn(
        connection: ShuiConnection,
        default_timeout: Duration,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let state = connection.subscribe();

        let worker = ChannelWorker {
            connection,
            parser: ShuiResponseParser::new(),
            default_timeout,
        };
        let handle = tokio::spawn(worker.run(rx, shutdown.clone()));

        (
            Self {
                tx,
                state,
                shutdown,
            },
            handle,
        )
    }

    /// Queue a command and wait for its result
    pub async fn submit(&self, command: Command) -> Result<CommandResponse, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Execute { command, reply }, rx).await
    }

    /// Queue a raw line terminated by an acknowledgement
    pub async fn send_line(
        &self,
        line: &str,
        source: CommandSource,
    ) -> Result<CommandResponse, CommandError> {
        self.submit(Command::new(line, source)).await
    }

    /// Open the session if it is not already open
    ///
    /// Goes through the queue so it never interleaves with a command.
    pub async fn ensure_connected(&self) -> Result<(), CommandError> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Connect { reply }, rx).await
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Observe connection state changes
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    async fn request<T>(
        &self,
        request: Request,
        rx: oneshot::Receiver<Result<T, CommandError>>,
    ) -> Result<T, CommandError> {
        if self.shutdown.is_cancelled() {
            return Err(CommandError::ShuttingDown);
        }
        self.tx
            .send(request)
            .await
            .map_err(|_| CommandError::ShuttingDown)?;
        rx.await.unwrap_or(Err(CommandError::ShuttingDown))
    }
}

impl fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandChannel")
            .field("state", &*self.state.borrow())
            .finish()
    }
}

struct ChannelWorker {
    connection: ShuiConnection,
    parser: ShuiResponseParser,
    default_timeout: Duration,
}

impl ChannelWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<Request>, shutdown: CancellationToken) {
        loop {
            let request = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            match request {
                Request::Execute { command, reply } => {
                    let result = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => Err(CommandError::ShuttingDown),
                        result = self.execute(&command) => result,
                    };
                    if let Err(e) = &result {
                        tracing::debug!("[{}] {} failed: {}", command.source, command.line, e);
                    }
                    let _ = reply.send(result);
                }
                Request::Connect { reply } => {
                    let result = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => Err(CommandError::ShuttingDown),
                        result = self.connection.connect() => result,
                    };
                    let _ = reply.send(result);
                }
            }
        }

        rx.close();
        while let Ok(request) = rx.try_recv() {
            match request {
                Request::Execute { reply, .. } => {
                    let _ = reply.send(Err(CommandError::ShuttingDown));
                }
                Request::Connect { reply } => {
                    let _ = reply.send(Err(CommandError::ShuttingDown));
                }
            }
        }

        self.connection.close().await;
        tracing::debug!("Command channel worker stopped");
    }

    async fn execute(&mut self, command: &Command) -> Result<CommandResponse, CommandError> {
        if !self.connection.is_connected() {
            return Err(CommandError::NotConnected);
        }

        let timeout = command.timeout.unwrap_or(self.default_timeout);
        let deadline = Instant::now() + timeout;

        self.connection.discard_pending()?;
        self.connection.send_line(&command.line).await?;

        let mut response = CommandResponse::default();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CommandError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }

            let line = self
                .connection
                .receive_line(remaining)
                .await
                .map_err(|e| match e {
                    CommandError::Timeout { .. } => CommandError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    },
                    other => other,
                })?;

            let Some(fact) = self.parser.parse(&line) else {
                continue;
            };
            let done = command.terminator.matches(&fact);
            response.lines.push(line.trim().to_string());
            response.facts.push(fact);

            if done {
                return Ok(response);
            }
        }
    }
}
