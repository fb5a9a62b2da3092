//! TCP session to the printer's command port
//!
//! [`ShuiConnection`] owns at most one socket. It performs no queuing: the
//! command channel worker is its only user, so exactly one operation is ever
//! in progress on the socket. Any I/O failure moves the session to
//! [`ConnectionState::Faulted`] and drops the socket; reconnecting is left to
//! the next poll tick.

use shui_core::{AppEvent, CommandError, ConnectionEvent, ConnectionState, EventBus};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;

/// Upper bound on banner lines drained after connecting
const MAX_BANNER_LINES: usize = 64;

/// TCP connection settings
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Printer host name or IP
    pub host: String,
    /// Command port
    pub port: u16,
    /// Deadline for establishing the socket
    pub connect_timeout: Duration,
    /// Silence that ends the welcome banner
    pub banner_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.213".to_string(),
            port: 8080,
            connect_timeout: Duration::from_secs(5),
            banner_timeout: Duration::from_secs(1),
        }
    }
}

/// The single TCP session to a SHUI printer
pub struct ShuiConnection {
    config: ConnectionConfig,
    stream: Option<BufReader<TcpStream>>,
    /// Bytes of a line not yet terminated
    pending: Vec<u8>,
    state_tx: watch::Sender<ConnectionState>,
    events: Option<Arc<EventBus>>,
}

impl ShuiConnection {
    /// Create a disconnected session
    pub fn new(config: ConnectionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            stream: None,
            pending: Vec::new(),
            state_tx,
            events: None,
        }
    }

    /// Publish state changes on `bus` as well as the watch channel
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    /// `host:port` of the printer
    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    /// Observe connection state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Whether a live socket exists
    pub fn is_connected(&self) -> bool {
        self.stream.is_some() && self.state().is_connected()
    }

    /// Open the session and drain the welcome banner
    ///
    /// Returns immediately if already connected.
    pub async fn connect(&mut self) -> Result<(), CommandError> {
        if self.is_connected() {
            return Ok(());
        }

        let address = self.address();
        self.set_state(ConnectionState::Connecting);
        tracing::debug!("Connecting to {}", address);

        let stream =
            match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&address))
                .await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    self.fault(format!("connect failed: {}", e));
                    return Err(CommandError::NotConnected);
                }
                Err(_) => {
                    self.fault(format!(
                        "connect timed out after {}ms",
                        self.config.connect_timeout.as_millis()
                    ));
                    return Err(CommandError::NotConnected);
                }
            };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Failed to set TCP_NODELAY: {}", e);
        }
        self.stream = Some(BufReader::new(stream));
        self.pending.clear();

        self.drain_banner().await;
        if self.stream.is_none() {
            return Err(CommandError::NotConnected);
        }

        self.set_state(ConnectionState::Connected);
        tracing::info!("Connected to printer at {}", address);
        Ok(())
    }

    async fn drain_banner(&mut self) {
        let timeout = self.config.banner_timeout;
        for _ in 0..MAX_BANNER_LINES {
            match self.receive_line(timeout).await {
                Ok(line) => tracing::debug!("Banner: {}", line),
                Err(_) => break,
            }
        }
    }

    /// Write raw bytes to the socket
    pub async fn send(&mut self, bytes: &[u8]) -> Result<(), CommandError> {
        let stream = self.stream.as_mut().ok_or(CommandError::NotConnected)?;
        let result = async {
            stream.get_mut().write_all(bytes).await?;
            stream.get_mut().flush().await
        }
        .await;

        if let Err(e) = result {
            let reason = format!("write failed: {}", e);
            self.fault(reason.clone());
            return Err(CommandError::Io { reason });
        }
        Ok(())
    }

    /// Write one command line followed by `\r\n`
    pub async fn send_line(&mut self, line: &str) -> Result<(), CommandError> {
        tracing::debug!(">> {}", line);
        self.send(format!("{}\r\n", line).as_bytes()).await
    }

    /// Wait for the next newline-terminated line
    ///
    /// A partial line survives a timeout and is dropped by the next
    /// [`discard_pending`](Self::discard_pending).
    pub async fn receive_line(&mut self, timeout: Duration) -> Result<String, CommandError> {
        let stream = self.stream.as_mut().ok_or(CommandError::NotConnected)?;

        match tokio::time::timeout(timeout, stream.read_until(b'\n', &mut self.pending)).await {
            Err(_) => Err(CommandError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
            Ok(Ok(0)) => {
                let reason = "connection closed by printer".to_string();
                self.fault(reason.clone());
                Err(CommandError::Io { reason })
            }
            Ok(Ok(_)) => {
                let line = String::from_utf8_lossy(&self.pending)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                self.pending.clear();
                tracing::trace!("<< {}", line);
                Ok(line)
            }
            Ok(Err(e)) => {
                let reason = format!("read failed: {}", e);
                self.fault(reason.clone());
                Err(CommandError::Io { reason })
            }
        }
    }

    /// Drop everything already received but not yet consumed
    ///
    /// Called before each command so late replies to a timed-out command are
    /// never attributed to the next one.
    pub fn discard_pending(&mut self) -> Result<usize, CommandError> {
        let stream = self.stream.as_mut().ok_or(CommandError::NotConnected)?;

        let mut discarded = self.pending.len();
        self.pending.clear();

        let buffered = stream.buffer().len();
        stream.consume(buffered);
        discarded += buffered;

        let mut scratch = [0u8; 512];
        let failure = loop {
            match stream.get_ref().try_read(&mut scratch) {
                Ok(0) => break Some("connection closed by printer".to_string()),
                Ok(n) => discarded += n,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break None,
                Err(e) => break Some(format!("read failed: {}", e)),
            }
        };

        if let Some(reason) = failure {
            self.fault(reason.clone());
            return Err(CommandError::Io { reason });
        }

        if discarded > 0 {
            tracing::debug!("Discarded {} stale bytes", discarded);
        }
        Ok(discarded)
    }

    /// Close the socket
    ///
    /// Safe to call repeatedly; the socket is released only once.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.get_mut().shutdown().await {
                tracing::debug!("Socket shutdown error: {}", e);
            }
            tracing::info!("Closed connection to {}", self.address());
        }
        self.pending.clear();
        self.set_state(ConnectionState::Disconnected);
    }

    fn fault(&mut self, reason: String) {
        tracing::warn!("Connection to {} faulted: {}", self.address(), reason);
        self.stream = None;
        self.pending.clear();
        self.set_state(ConnectionState::Faulted(reason));
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state.clone();
                true
            }
        });

        if changed {
            if let Some(bus) = &self.events {
                bus.publish(AppEvent::Connection(ConnectionEvent::StateChanged {
                    address: self.address(),
                    state,
                }));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, ConnectionConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port,
            connect_timeout: Duration::from_secs(2),
            banner_timeout: Duration::from_millis(100),
        };
        (listener, config)
    }

    #[tokio::test]
    async fn test_connect_drains_banner() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"SHUI: 2025-07-13\r\nWelcome\r\n")
                .await
                .unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"M105\r\n");
            socket.write_all(b"ok T:20/0\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut conn = ShuiConnection::new(config);
        conn.connect().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);

        conn.discard_pending().unwrap();
        conn.send_line("M105").await.unwrap();
        let line = conn.receive_line(Duration::from_secs(1)).await.unwrap();
        assert_eq!(line, "ok T:20/0");

        conn.close().await;
        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let (listener, config) = listener().await;
        let accepts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = accepts.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    drop(socket);
                });
            }
        });

        let mut conn = ShuiConnection::new(config);
        conn.connect().await.unwrap();
        conn.connect().await.unwrap();
        assert_eq!(accepts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refused_connection_faults() {
        let (listener, config) = listener().await;
        drop(listener);

        let mut conn = ShuiConnection::new(config);
        let mut states = conn.subscribe();
        assert_eq!(conn.connect().await, Err(CommandError::NotConnected));
        assert!(matches!(conn.state(), ConnectionState::Faulted(_)));
        assert!(states.has_changed().unwrap());
        assert!(matches!(
            *states.borrow_and_update(),
            ConnectionState::Faulted(_)
        ));
    }

    #[tokio::test]
    async fn test_read_timeout_keeps_session() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(socket);
        });

        let mut conn = ShuiConnection::new(config);
        conn.connect().await.unwrap();
        let err = conn
            .receive_line(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, CommandError::Timeout { timeout_ms: 50 });
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_peer_close_faults() {
        let (listener, config) = listener().await;
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            drop(socket);
        });

        let mut conn = ShuiConnection::new(config);
        conn.connect().await.unwrap();
        let err = conn.receive_line(Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, CommandError::Io { .. }));
        assert!(matches!(conn.state(), ConnectionState::Faulted(_)));
        assert!(!conn.is_connected());
    }
}
