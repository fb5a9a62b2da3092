//! Scripted SHUI printer and upload endpoint on loopback sockets

#![allow(dead_code)]

use futures_util::FutureExt;
use shui_communication::{CommandChannel, ConnectionConfig, ShuiConnection, UploadConfig};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct PrinterScript {
    banner: Vec<String>,
    replies: HashMap<String, Vec<String>>,
    delays: HashMap<String, Duration>,
    offline: bool,
    received: Vec<String>,
    overlaps: usize,
    connections: usize,
}

/// Fake printer command port
///
/// Replies are looked up by the full command line, then by its first word.
/// Unscripted commands get `echo:<command>` followed by `ok`. `HANG` is never
/// answered. While offline, accepted sockets are closed immediately and a
/// command on an open socket closes it without a reply.
pub struct MockPrinter {
    addr: SocketAddr,
    script: Arc<Mutex<PrinterScript>>,
    task: JoinHandle<()>,
}

impl MockPrinter {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let script = Arc::new(Mutex::new(PrinterScript {
            banner: vec!["SHUI WiFi ready".to_string(), "ok".to_string()],
            ..Default::default()
        }));

        let shared = script.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let offline = {
                    let mut script = shared.lock().unwrap();
                    script.connections += 1;
                    script.offline
                };
                if offline {
                    drop(socket);
                    continue;
                }
                tokio::spawn(serve_printer(socket, shared.clone()));
            }
        });

        Self { addr, script, task }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: "127.0.0.1".to_string(),
            port: self.port(),
            connect_timeout: Duration::from_secs(1),
            banner_timeout: Duration::from_millis(50),
        }
    }

    /// Channel worker bound to this printer
    pub fn channel(&self, timeout: Duration) -> (CommandChannel, CancellationToken) {
        let shutdown = CancellationToken::new();
        let (channel, _) = CommandChannel::spawn(
            ShuiConnection::new(self.connection_config()),
            timeout,
            shutdown.clone(),
        );
        (channel, shutdown)
    }

    pub fn set_reply(&self, command: &str, lines: &[&str]) {
        self.script.lock().unwrap().replies.insert(
            command.to_string(),
            lines.iter().map(|l| l.to_string()).collect(),
        );
    }

    pub fn set_delay(&self, command: &str, delay: Duration) {
        self.script
            .lock()
            .unwrap()
            .delays
            .insert(command.to_string(), delay);
    }

    pub fn set_online(&self, online: bool) {
        self.script.lock().unwrap().offline = !online;
    }

    pub fn received(&self) -> Vec<String> {
        self.script.lock().unwrap().received.clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.received().iter().filter(|c| *c == command).count()
    }

    pub fn clear_received(&self) {
        self.script.lock().unwrap().received.clear();
    }

    /// Commands that arrived before the previous reply was written
    pub fn overlaps(&self) -> usize {
        self.script.lock().unwrap().overlaps
    }

    pub fn connections(&self) -> usize {
        self.script.lock().unwrap().connections
    }
}

impl Drop for MockPrinter {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_printer(socket: TcpStream, script: Arc<Mutex<PrinterScript>>) {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);

    let banner: String = script
        .lock()
        .unwrap()
        .banner
        .iter()
        .map(|l| format!("{}\r\n", l))
        .collect();
    if write.write_all(banner.as_bytes()).await.is_err() {
        return;
    }

    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let command = line.trim().to_string();
        if command.is_empty() {
            continue;
        }
        let key = command.split_whitespace().next().unwrap_or_default().to_string();

        let (offline, reply, delay) = {
            let mut script = script.lock().unwrap();
            script.received.push(command.clone());
            let reply = script
                .replies
                .get(&command)
                .or_else(|| script.replies.get(&key))
                .cloned();
            (script.offline, reply, script.delays.get(&key).copied())
        };

        if offline {
            return;
        }
        if command == "HANG" {
            continue;
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let pipelined = matches!(reader.fill_buf().now_or_never(), Some(Ok(buf)) if !buf.is_empty());
        if pipelined {
            script.lock().unwrap().overlaps += 1;
        }

        let lines = reply.unwrap_or_else(|| vec![format!("echo:{}", command), "ok".to_string()]);
        let out: String = lines.iter().map(|l| format!("{}\r\n", l)).collect();
        if write.write_all(out.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// One request seen by [`MockHttp`]
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

struct HttpScript {
    status: u16,
    body: String,
    hang: bool,
    requests: Vec<HttpRequest>,
}

/// Fake `/upload` endpoint
///
/// Reads each request completely, then answers with the scripted status and
/// body, or never answers while hanging.
pub struct MockHttp {
    addr: SocketAddr,
    script: Arc<Mutex<HttpScript>>,
    task: JoinHandle<()>,
}

impl MockHttp {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let script = Arc::new(Mutex::new(HttpScript {
            status: 200,
            body: r#"{"err":0}"#.to_string(),
            hang: false,
            requests: Vec::new(),
        }));

        let shared = script.clone();
        let task = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(serve_http(socket, shared.clone()));
            }
        });

        Self { addr, script, task }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            host: "127.0.0.1".to_string(),
            port: self.port(),
            progress_interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    pub fn respond(&self, status: u16, body: &str) {
        let mut script = self.script.lock().unwrap();
        script.status = status;
        script.body = body.to_string();
    }

    pub fn set_hang(&self, hang: bool) {
        self.script.lock().unwrap().hang = hang;
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.script.lock().unwrap().requests.clone()
    }
}

impl Drop for MockHttp {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_http(socket: TcpStream, script: Arc<Mutex<HttpScript>>) {
    let (read, mut write) = socket.into_split();
    let mut reader = BufReader::new(read);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.unwrap_or(0) == 0 {
        return;
    }

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
            return;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }

    let header = |name: &str| {
        headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    };

    let mut body = Vec::new();
    if let Some(length) = header("content-length").and_then(|v| v.parse::<usize>().ok()) {
        body.resize(length, 0);
        if reader.read_exact(&mut body).await.is_err() {
            return;
        }
    } else if header("transfer-encoding").is_some_and(|v| v.contains("chunked")) {
        loop {
            let mut size_line = String::new();
            if reader.read_line(&mut size_line).await.unwrap_or(0) == 0 {
                return;
            }
            let Ok(size) = usize::from_str_radix(size_line.trim(), 16) else {
                return;
            };
            if size == 0 {
                let mut trailer = String::new();
                let _ = reader.read_line(&mut trailer).await;
                break;
            }
            let mut chunk = vec![0; size + 2];
            if reader.read_exact(&mut chunk).await.is_err() {
                return;
            }
            chunk.truncate(size);
            body.extend_from_slice(&chunk);
        }
    }

    let (hang, status, reply) = {
        let mut script = script.lock().unwrap();
        script.requests.push(HttpRequest {
            request_line: request_line.trim_end().to_string(),
            headers: headers.clone(),
            body,
        });
        (script.hang, script.status, script.body.clone())
    };

    if hang {
        // Hold the socket until the client gives up
        let mut sink = [0u8; 1024];
        while matches!(reader.read(&mut sink).await, Ok(n) if n > 0) {}
        return;
    }

    let reason = if status == 200 { "OK" } else { "Error" };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        reply.len(),
        reply
    );
    let _ = write.write_all(response.as_bytes()).await;
    let _ = write.shutdown().await;
}

/// Poll `condition` every 20ms until it holds or `timeout` passes
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

/// Port with nothing listening on it
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    listener.local_addr().expect("local addr").port()
}
