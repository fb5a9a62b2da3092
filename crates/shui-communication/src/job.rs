//! Print job state machine
//!
//! The authoritative model of the print lifecycle and the only writer of
//! [`JobState`]. User intents (upload, pause, resume, stop) are validated here
//! before any command is sent; poll observations drive the automatic
//! transitions:
//!
//! - `Uploading → Printing` on a successful upload, then `→ Idle` if no print
//!   activity shows up within the grace window
//! - `Printing → Idle` when progress reaches 100% or the printer reports the
//!   job finished
//! - any state `→ Idle` with [`JobAnnotation::ConnectionLost`] once the number
//!   of consecutive polls finding the session down reaches the disconnect
//!   threshold

use crate::communication::channel::CommandChannel;
use crate::firmware::shui::commands;
use crate::firmware::shui::poller::SnapshotListener;
use parking_lot::Mutex;
use shui_core::{
    AppEvent, Error, EventBus, JobAnnotation, JobError, JobSnapshot, JobState, PrintActivity,
    PrinterSnapshot, UploadOutcome,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Job policy settings
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// How long after a successful upload to wait for print activity
    pub grace_window: Duration,
    /// Consecutive failed polls that force the job back to idle
    pub disconnect_threshold: u32,
    /// Cooling dwell run on stop; 0 disables it
    pub cooling_secs: u32,
    /// Base response deadline for stop/cooling commands
    pub response_timeout: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            grace_window: Duration::from_secs(45),
            disconnect_threshold: 3,
            cooling_secs: 0,
            response_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Default)]
struct Tracking {
    offline_polls: u32,
    awaiting_activity_until: Option<Instant>,
    upload_cancel: Option<CancellationToken>,
}

/// Print job state machine
pub struct PrintJobStateMachine {
    channel: CommandChannel,
    config: JobConfig,
    job_tx: watch::Sender<JobSnapshot>,
    events: Arc<EventBus>,
    tracking: Mutex<Tracking>,
    /// Serializes pause/resume/stop so their commands never interleave
    control: tokio::sync::Mutex<()>,
}

impl PrintJobStateMachine {
    /// Create a machine in `Idle`
    pub fn new(channel: CommandChannel, config: JobConfig, events: Arc<EventBus>) -> Self {
        let (job_tx, _) = watch::channel(JobSnapshot::idle());
        Self {
            channel,
            config,
            job_tx,
            events,
            tracking: Mutex::new(Tracking::default()),
            control: tokio::sync::Mutex::new(()),
        }
    }

    /// Current state
    pub fn state(&self) -> JobState {
        self.job_tx.borrow().state
    }

    /// Current state with its annotation
    pub fn snapshot(&self) -> JobSnapshot {
        self.job_tx.borrow().clone()
    }

    /// Observe job changes
    pub fn subscribe(&self) -> watch::Receiver<JobSnapshot> {
        self.job_tx.subscribe()
    }

    /// `Idle → Uploading`
    ///
    /// `cancel` is triggered if the job is forced idle while uploading.
    pub fn begin_upload(&self, file: &str, cancel: CancellationToken) -> Result<(), JobError> {
        let mut rejected = None;
        self.job_tx.send_if_modified(|job| {
            if job.state != JobState::Idle {
                rejected = Some(job.state);
                return false;
            }
            let mut next = job.transition(JobState::Uploading, None);
            next.file = Some(file.to_string());
            *job = next;
            true
        });

        if let Some(current) = rejected {
            return Err(invalid(current, JobState::Uploading));
        }

        {
            let mut tracking = self.tracking.lock();
            tracking.upload_cancel = Some(cancel);
            tracking.awaiting_activity_until = None;
            tracking.offline_polls = 0;
        }
        self.announce();
        Ok(())
    }

    /// Settle an upload: `Uploading → Printing` or `Uploading → Idle`
    ///
    /// Ignored if the job already left `Uploading` (e.g. forced idle).
    pub fn finish_upload(&self, outcome: &UploadOutcome) {
        let (to, annotation) = match outcome {
            UploadOutcome::Completed { .. } => (JobState::Printing, None),
            UploadOutcome::Failed(reason) => (
                JobState::Idle,
                Some(JobAnnotation::UploadFailed(reason.clone())),
            ),
            UploadOutcome::Cancelled => (JobState::Idle, Some(JobAnnotation::UploadCancelled)),
        };

        {
            let mut tracking = self.tracking.lock();
            tracking.upload_cancel = None;
            if to == JobState::Printing {
                tracking.awaiting_activity_until = Some(Instant::now() + self.config.grace_window);
            }
        }

        if !self.transition(&[JobState::Uploading], to, annotation) {
            tracing::debug!("Upload finished after job left Uploading; ignoring");
        }
    }

    /// Cancel the active upload, if any
    pub fn cancel_upload(&self) -> bool {
        match self.tracking.lock().upload_cancel.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// `Printing → Paused`
    pub async fn pause(&self) -> Result<(), Error> {
        let _guard = self.control.lock().await;
        self.require(&[JobState::Printing], JobState::Paused)?;
        self.channel.submit(commands::job_control(commands::PAUSE)).await?;
        self.transition(&[JobState::Printing], JobState::Paused, None);
        Ok(())
    }

    /// `Paused → Printing`
    pub async fn resume(&self) -> Result<(), Error> {
        let _guard = self.control.lock().await;
        self.require(&[JobState::Paused], JobState::Printing)?;
        self.channel.submit(commands::job_control(commands::RESUME)).await?;
        self.transition(&[JobState::Paused], JobState::Printing, None);
        Ok(())
    }

    /// `Printing/Paused → Stopping → Idle`
    ///
    /// Sends the stop command, the optional cooling sequence, and the final
    /// motor shutdown, then settles to `Idle` whether or not each command was
    /// acknowledged in time.
    pub async fn stop(&self) -> Result<(), Error> {
        let _guard = self.control.lock().await;
        let active = [JobState::Printing, JobState::Paused];
        self.require(&active, JobState::Stopping)?;
        if !self.transition(&active, JobState::Stopping, None) {
            return Err(invalid(self.state(), JobState::Stopping).into());
        }
        self.tracking.lock().awaiting_activity_until = None;

        let mut sequence = vec![commands::job_control(commands::STOP)];
        sequence.extend(commands::cooling_sequence(
            self.config.cooling_secs,
            self.config.response_timeout,
        ));
        sequence.push(
            commands::job_control(commands::DISABLE_MOTORS)
                .with_timeout(self.config.response_timeout),
        );

        for command in sequence {
            if self.state() != JobState::Stopping {
                break;
            }
            if let Err(e) = self.channel.submit(command.clone()).await {
                tracing::warn!("Stop sequence: {} failed: {}", command.line, e);
            }
        }

        self.transition(
            &[JobState::Stopping],
            JobState::Idle,
            Some(JobAnnotation::Stopped),
        );
        Ok(())
    }

    /// Apply one poll observation
    pub fn observe(&self, snapshot: &PrinterSnapshot) {
        let mut tracking = self.tracking.lock();
        let current = self.state();

        if !snapshot.connected {
            if snapshot.session.is_connected() {
                tracing::debug!(
                    "Poll #{} failed on a live session; not counted as a disconnect",
                    snapshot.sequence
                );
                tracking.offline_polls = 0;
                return;
            }
            tracking.offline_polls += 1;
            if tracking.offline_polls >= self.config.disconnect_threshold
                && current != JobState::Idle
            {
                tracing::warn!(
                    "No printer response for {} polls; forcing {} job to Idle",
                    tracking.offline_polls,
                    current
                );
                if let Some(token) = tracking.upload_cancel.take() {
                    token.cancel();
                }
                tracking.awaiting_activity_until = None;
                drop(tracking);
                self.transition(
                    &[current],
                    JobState::Idle,
                    Some(JobAnnotation::ConnectionLost),
                );
            }
            return;
        }
        tracking.offline_polls = 0;

        if current != JobState::Printing {
            return;
        }

        if snapshot.is_complete() {
            tracking.awaiting_activity_until = None;
            drop(tracking);
            tracing::info!("Print complete");
            self.transition(
                &[JobState::Printing],
                JobState::Idle,
                Some(JobAnnotation::Completed),
            );
            return;
        }

        let active = matches!(
            snapshot.activity,
            PrintActivity::Printing | PrintActivity::Paused
        ) || snapshot.progress.is_some_and(|p| p > 0);
        if active {
            tracking.awaiting_activity_until = None;
            return;
        }

        match tracking.awaiting_activity_until {
            Some(deadline) if Instant::now() < deadline => {
                tracing::debug!("Waiting for print to start");
            }
            Some(_) => {
                tracking.awaiting_activity_until = None;
                drop(tracking);
                tracing::warn!("Printer shows no activity after upload; reverting to Idle");
                self.transition(
                    &[JobState::Printing],
                    JobState::Idle,
                    Some(JobAnnotation::NoActivityAfterUpload),
                );
            }
            None if snapshot.activity == PrintActivity::NotPrinting => {
                drop(tracking);
                tracing::info!("Printer reports job finished");
                self.transition(
                    &[JobState::Printing],
                    JobState::Idle,
                    Some(JobAnnotation::Completed),
                );
            }
            None => {}
        }
    }

    fn require(&self, allowed: &[JobState], requested: JobState) -> Result<(), JobError> {
        let current = self.state();
        if allowed.contains(&current) {
            Ok(())
        } else {
            Err(invalid(current, requested))
        }
    }

    /// Move to `to` if the current state is one of `from`
    fn transition(
        &self,
        from: &[JobState],
        to: JobState,
        annotation: Option<JobAnnotation>,
    ) -> bool {
        let changed = self.job_tx.send_if_modified(|job| {
            if !from.contains(&job.state) {
                return false;
            }
            *job = job.transition(to, annotation.clone());
            true
        });

        if changed {
            self.announce();
        }
        changed
    }

    fn announce(&self) {
        let job = self.snapshot();
        match &job.annotation {
            Some(note) => tracing::info!("Job -> {} ({})", job.state, note),
            None => tracing::info!("Job -> {}", job.state),
        }
        self.events.publish(AppEvent::Job(job));
    }
}

impl SnapshotListener for PrintJobStateMachine {
    fn on_snapshot(&self, snapshot: &PrinterSnapshot) {
        self.observe(snapshot);
    }
}

fn invalid(current: JobState, requested: JobState) -> JobError {
    JobError::InvalidTransition {
        current: current.to_string(),
        requested: requested.to_string(),
    }
}
