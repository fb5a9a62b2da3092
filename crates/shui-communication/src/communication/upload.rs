//! HTTP file upload
//!
//! Uploads run on their own HTTP connection, independent of the TCP command
//! session, so polling continues while a long transfer is in progress.
//! Progress is reported at a bounded rate; cancellation drops the in-flight
//! request, which aborts the connection.

use crate::firmware::shui::gcode;
use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use shui_core::{AppEvent, EventBus, UploadError, UploadEvent, UploadOutcome, UploadProgress};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Body chunk handed to the HTTP client at a time
const CHUNK_SIZE: usize = 16 * 1024;

/// Upload settings
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Printer host name or IP
    pub host: String,
    /// HTTP port
    pub port: u16,
    /// Assumed throughput in bytes/sec, for ETA display only
    pub throughput_bps: u64,
    /// Minimum spacing between progress updates
    pub progress_interval: Duration,
    /// Floor for the per-request deadline
    pub min_read_timeout: Duration,
    /// Deadline for establishing the HTTP connection
    pub connect_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.213".to_string(),
            port: 8080,
            throughput_bps: 80 * 1000,
            progress_interval: Duration::from_millis(250),
            min_read_timeout: Duration::from_secs(180),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// One file transfer, owned by the upload manager while it runs
#[derive(Debug)]
pub struct UploadTask {
    /// Source file
    pub path: PathBuf,
    /// Name the printer stores the file under
    pub file_name: String,
    /// Body after post-processing
    body: Vec<u8>,
    /// Cancellation flag
    cancel: CancellationToken,
    /// Bytes sent so far
    progress: watch::Sender<UploadProgress>,
}

impl UploadTask {
    /// Build a task from an in-memory body
    pub fn new(
        path: impl Into<PathBuf>,
        file_name: impl Into<String>,
        body: Vec<u8>,
        cancel: CancellationToken,
    ) -> Self {
        let total = body.len() as u64;
        let (progress, _) = watch::channel(UploadProgress::new(0, total, 0));
        Self {
            path: path.into(),
            file_name: file_name.into(),
            body,
            cancel,
            progress,
        }
    }

    /// Read `path` and apply the cooling block when `cooling_secs > 0`
    ///
    /// The file on disk is not modified.
    pub async fn from_file(
        path: &Path,
        cooling_secs: u32,
        cancel: CancellationToken,
    ) -> Result<Self, UploadError> {
        let unreadable = |reason: String| UploadError::FileUnreadable {
            path: path.display().to_string(),
            reason,
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| unreadable("not a file".to_string()))?;

        let mut body = tokio::fs::read(path)
            .await
            .map_err(|e| unreadable(e.to_string()))?;

        if let Some(estimate) = gcode::estimated_print_time(&String::from_utf8_lossy(&body)) {
            tracing::info!("{}: slicer estimate {}", file_name, estimate);
        }
        if cooling_secs > 0 {
            body = gcode::apply_cooling(&body, cooling_secs);
        }

        Ok(Self::new(path, file_name, body, cancel))
    }

    /// Body size in bytes
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }

    /// Token that cancels this task
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Observe progress of this task
    pub fn watch_progress(&self) -> watch::Receiver<UploadProgress> {
        self.progress.subscribe()
    }
}

/// Caller's handle on a running upload
#[derive(Debug)]
pub struct UploadHandle {
    file_name: String,
    cancel: CancellationToken,
    progress: watch::Receiver<UploadProgress>,
    outcome: oneshot::Receiver<UploadOutcome>,
}

impl UploadHandle {
    /// Create a handle for an upload whose outcome arrives on `outcome`
    pub fn new(task: &UploadTask, outcome: oneshot::Receiver<UploadOutcome>) -> Self {
        Self {
            file_name: task.file_name.clone(),
            cancel: task.cancel_token(),
            progress: task.watch_progress(),
            outcome,
        }
    }

    /// File name on the printer
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Request cancellation; the outcome becomes `Cancelled`
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Latest progress
    pub fn progress(&self) -> UploadProgress {
        *self.progress.borrow()
    }

    /// Progress receiver for awaiting updates
    pub fn watch_progress(&self) -> watch::Receiver<UploadProgress> {
        self.progress.clone()
    }

    /// Wait for the transfer to finish
    pub async fn outcome(self) -> UploadOutcome {
        self.outcome.await.unwrap_or_else(|_| {
            UploadOutcome::Failed("upload task ended without a result".to_string())
        })
    }
}

/// Performs multipart uploads to the printer's `/upload` endpoint
pub struct UploadManager {
    client: reqwest::Client,
    config: UploadConfig,
    events: Arc<EventBus>,
}

impl UploadManager {
    /// Create an upload manager with its own HTTP client
    pub fn new(config: UploadConfig, events: Arc<EventBus>) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| UploadError::Failed {
                reason: format!("HTTP client setup failed: {}", e),
            })?;

        Ok(Self {
            client,
            config,
            events,
        })
    }

    /// Upload endpoint
    pub fn url(&self) -> String {
        format!("http://{}:{}/upload", self.config.host, self.config.port)
    }

    /// Deadline for a request carrying `size` bytes
    pub fn request_timeout(&self, size: u64) -> Duration {
        Duration::from_secs(size / 10_240 + 120).max(self.config.min_read_timeout)
    }

    /// Transfer `task` and report the outcome
    ///
    /// Never retries; the caller decides what to do with a failure.
    pub async fn upload(&self, task: UploadTask) -> UploadOutcome {
        let total = task.size();
        let name = task.file_name.clone();
        tracing::info!("Uploading {} ({} bytes) to {}", name, total, self.url());
        self.events.publish(AppEvent::Upload(UploadEvent::Started {
            file: name.clone(),
            total_bytes: total,
        }));

        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = task.cancel.cancelled() => UploadOutcome::Cancelled,
            outcome = self.transfer(&task, started) => outcome,
        };

        match &outcome {
            UploadOutcome::Completed { .. } => tracing::info!(
                "Uploaded {} at {:.0} B/s",
                name,
                outcome.throughput_bps().unwrap_or_default()
            ),
            UploadOutcome::Failed(reason) => tracing::error!("Upload of {} failed: {}", name, reason),
            UploadOutcome::Cancelled => tracing::info!("Upload of {} cancelled", name),
        }

        self.events.publish(AppEvent::Upload(UploadEvent::Finished {
            file: name,
            outcome: outcome.clone(),
        }));
        outcome
    }

    async fn transfer(&self, task: &UploadTask, started: Instant) -> UploadOutcome {
        let total = task.size();
        let body = reqwest::Body::wrap_stream(self.progress_stream(task));

        let part = match Part::stream_with_length(body, total)
            .file_name(task.file_name.clone())
            .mime_str("application/octet-stream")
        {
            Ok(part) => part,
            Err(e) => return UploadOutcome::Failed(e.to_string()),
        };

        let request = self
            .client
            .post(self.url())
            .query(&[("X-Filename", task.file_name.as_str())])
            .multipart(Form::new().part("file", part))
            .timeout(self.request_timeout(total));

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return UploadOutcome::Failed(describe(&e)),
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return UploadOutcome::Failed(describe(&e)),
        };

        if !status.is_success() {
            return UploadOutcome::Failed(format!("HTTP {}", status));
        }

        if let Some(code) = firmware_error(&body) {
            return UploadOutcome::Failed(format!(
                "printer returned error {}: {}",
                code,
                body.trim()
            ));
        }

        UploadOutcome::Completed {
            bytes: total,
            elapsed: started.elapsed(),
        }
    }

    fn progress_stream(
        &self,
        task: &UploadTask,
    ) -> impl futures_util::Stream<Item = Result<Vec<u8>, std::io::Error>> + Send + Sync + 'static {
        let total = task.size();
        let throughput = self.config.throughput_bps;
        let interval = self.config.progress_interval;
        let progress = task.progress.clone();
        let events = self.events.clone();

        let chunks: Vec<Vec<u8>> = task.body.chunks(CHUNK_SIZE).map(<[u8]>::to_vec).collect();
        let mut sent = 0u64;
        let mut last_report: Option<Instant> = None;

        futures_util::stream::iter(chunks).map(move |chunk| {
            sent += chunk.len() as u64;
            let due = last_report.is_none_or(|at| at.elapsed() >= interval);
            if due || sent >= total {
                last_report = Some(Instant::now());
                let update = UploadProgress::new(sent, total, throughput);
                progress.send_replace(update);
                events.publish(AppEvent::Upload(UploadEvent::Progress(update)));
            }
            Ok(chunk)
        })
    }
}

/// Non-zero `err` field in a JSON reply
fn firmware_error(body: &str) -> Option<i64> {
    let value: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
    value
        .get("err")
        .and_then(serde_json::Value::as_i64)
        .filter(|code| *code != 0)
}

fn describe(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "printer did not respond in time".to_string()
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else {
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_firmware_error() {
        assert_eq!(firmware_error(r#"{"err":0}"#), None);
        assert_eq!(firmware_error(r#"{"err": 1, "msg": "sd"}"#), Some(1));
        assert_eq!(firmware_error("OK"), None);
        assert_eq!(firmware_error(""), None);
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let manager = UploadManager::new(UploadConfig::default(), Arc::new(EventBus::new()))
            .expect("client");
        assert_eq!(manager.request_timeout(1024), Duration::from_secs(180));
        assert_eq!(
            manager.request_timeout(10_240 * 100),
            Duration::from_secs(220)
        );
        assert_eq!(manager.url(), "http://192.168.1.213:8080/upload");
    }

    #[tokio::test]
    async fn test_task_from_file_applies_cooling() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cube.gcode");
        std::fs::write(&path, "G28\nM84\n").expect("write");

        let task = UploadTask::from_file(&path, 30, CancellationToken::new())
            .await
            .expect("task");
        assert_eq!(task.file_name, "cube.gcode");
        let body = String::from_utf8(task.body.clone()).expect("utf8");
        assert!(body.contains("G4 S30\n"));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "G28\nM84\n");
    }

    #[tokio::test]
    async fn test_task_from_file_keeps_raw_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("latin1.gcode");
        let original = b"; Temp 210\xB0C\nG28\nM84\n".to_vec();
        std::fs::write(&path, &original).expect("write");

        let task = UploadTask::from_file(&path, 5, CancellationToken::new())
            .await
            .expect("task");
        assert!(task.body.starts_with(b"; Temp 210\xB0C\nG28\n"));
        assert!(task.body.ends_with(b"G4 S5\nM106 S0\n; ---\nM84\n"));
        assert_eq!(std::fs::read(&path).expect("read"), original);
    }

    #[tokio::test]
    async fn test_task_from_missing_file() {
        let err = UploadTask::from_file(
            Path::new("/nonexistent/part.gcode"),
            0,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, UploadError::FileUnreadable { .. }));
    }
}
