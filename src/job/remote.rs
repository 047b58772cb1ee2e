use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::BatchConfig;
use crate::error::SubmissionError;
use crate::job::artifact::{remove_if_exists, WorkUnitPaths};
use crate::job::id::JobId;
use crate::scheduler::{SchedulerClient, SchedulerStatus, StatusReport};

/// Why a job stopped progressing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalReason {
    /// The scheduler reported DONE or EXIT.
    Finished(SchedulerStatus),
    SubmissionFailed(String),
    Cancelled,
    /// The scheduler kept answering that it does not know the job.
    Lost,
    /// Status answers stayed unreadable; the job was given up on.
    Stalled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Unsubmitted,
    Submitted,
    Terminal(TerminalReason),
}

/// Contents of the scheduler logs of a finished job. `None` means the file
/// was not there (job crashed, was evicted, or never ran).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobLogs {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// One work unit submitted to the scheduler.
///
/// Moves from `Unsubmitted` to `Submitted` on [`submit`](Self::submit) and
/// ends in `Terminal`, which is absorbing. [`wait`](Self::wait) and
/// [`communicate`](Self::communicate) block until the scheduler says the
/// job is done; [`kill`](Self::kill) waits at most `stall_threshold` polls
/// for the cancellation to land.
pub struct RemoteJob {
    id: JobId,
    paths: WorkUnitPaths,
    queue: String,
    client: Arc<dyn SchedulerClient>,
    handle: Option<String>,
    state: JobState,
    poll_interval: Duration,
    stall_threshold: u32,
    unparsable_polls: u32,
    not_found_polls: u32,
    cancel_requested: bool,
    submitted_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for RemoteJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteJob")
            .field("id", &self.id)
            .field("handle", &self.handle)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl RemoteJob {
    pub fn new(
        id: JobId,
        paths: WorkUnitPaths,
        queue: impl Into<String>,
        client: Arc<dyn SchedulerClient>,
        config: &BatchConfig,
    ) -> Self {
        Self {
            id,
            paths,
            queue: queue.into(),
            client,
            handle: None,
            state: JobState::Unsubmitted,
            poll_interval: config.job_poll_interval,
            stall_threshold: config.stall_threshold.max(1),
            unparsable_polls: 0,
            not_found_polls: 0,
            cancel_requested: false,
            submitted_at: None,
            finished_at: None,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn paths(&self) -> &WorkUnitPaths {
        &self.paths
    }

    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, JobState::Terminal(_))
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Hand the job to the scheduler.
    ///
    /// Logs left over at the target paths are deleted first so they cannot be
    /// mistaken for this job's. A rejected submission makes the job terminal.
    pub async fn submit(&mut self) -> Result<(), SubmissionError> {
        if self.state != JobState::Unsubmitted {
            return Err(SubmissionError::AlreadySubmitted(
                self.handle.clone().unwrap_or_default(),
            ));
        }

        for log in [self.paths.stdout_log(), self.paths.stderr_log()] {
            if let Err(e) = remove_if_exists(&log) {
                tracing::warn!(job_id = %self.id, path = %log.display(), error = %e, "Failed to remove stale log");
            }
        }

        let job_name = self.paths.job_name();
        match self
            .client
            .submit(&self.paths.script, &self.paths.log_prefix, &self.queue, &job_name)
            .await
        {
            Ok(handle) => {
                tracing::debug!(job_id = %self.id, handle = %handle, queue = %self.queue, "Submitted script");
                self.handle = Some(handle);
                self.state = JobState::Submitted;
                self.submitted_at = Some(Utc::now());
                Ok(())
            }
            Err(e) => {
                self.fail_submission(e.to_string());
                Err(e)
            }
        }
    }

    /// Mark a job that could not be handed to the scheduler at all.
    pub(crate) fn fail_submission(&mut self, reason: String) {
        tracing::error!(job_id = %self.id, reason = %reason, "Job submission failed");
        self.finish(TerminalReason::SubmissionFailed(reason));
    }

    /// Ask the scheduler once for the job's status. Returns true once the job
    /// is terminal; a terminal job is never queried again.
    pub async fn poll(&mut self) -> bool {
        if self.state != JobState::Submitted {
            return self.is_terminal();
        }
        let Some(handle) = self.handle.clone() else {
            return false;
        };

        match self.client.query(&handle).await {
            StatusReport::Status(status) => {
                self.unparsable_polls = 0;
                self.not_found_polls = 0;
                if status.is_terminal() {
                    tracing::debug!(job_id = %self.id, handle = %handle, status = %status, "Job reached terminal status");
                    self.finish(TerminalReason::Finished(status));
                }
            }
            StatusReport::Unparsable(response) => {
                self.not_found_polls = 0;
                self.unparsable_polls += 1;
                if self.unparsable_polls >= self.stall_threshold {
                    tracing::warn!(
                        job_id = %self.id,
                        handle = %handle,
                        polls = self.unparsable_polls,
                        response = %response.trim(),
                        "Job appears stalled, status response unreadable, giving up"
                    );
                    self.request_cancel().await;
                    self.finish(TerminalReason::Stalled);
                }
            }
            StatusReport::NotFound => {
                self.unparsable_polls = 0;
                self.not_found_polls += 1;
                if self.not_found_polls >= self.stall_threshold {
                    tracing::warn!(job_id = %self.id, handle = %handle, "Scheduler no longer knows the job");
                    self.finish(TerminalReason::Lost);
                }
            }
        }

        self.is_terminal()
    }

    /// Poll until the job is terminal. When `shutdown` fires first the job is
    /// cancelled before returning.
    pub async fn wait(&mut self, shutdown: &CancellationToken) {
        loop {
            if self.poll().await {
                return;
            }
            tokio::select! {
                _ = shutdown.cancelled() => {
                    self.cancel().await;
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Wait for the job to be terminal, then read and remove its logs.
    pub async fn communicate(&mut self) -> JobLogs {
        while !self.poll().await {
            tokio::time::sleep(self.poll_interval).await;
        }
        self.read_logs().await
    }

    /// Cancel the job, wait for the scheduler to report it ended, and read
    /// whatever logs it left.
    pub async fn kill(&mut self) -> JobLogs {
        self.cancel().await;
        self.read_logs().await
    }

    /// Send the cancel command without waiting for it to take effect. Sent at
    /// most once per job.
    pub async fn request_cancel(&mut self) {
        if self.state != JobState::Submitted || self.cancel_requested {
            return;
        }
        if let Some(handle) = &self.handle {
            self.client.cancel(handle).await;
        }
        self.cancel_requested = true;
    }

    async fn cancel(&mut self) {
        if self.state != JobState::Submitted {
            return;
        }
        self.request_cancel().await;
        self.await_cancellation().await;
        tracing::info!(job_id = %self.id, "Job cancelled");
        self.finish(TerminalReason::Cancelled);
    }

    /// Poll until the scheduler reports the cancelled job as ended, so its
    /// report is on disk before the logs are read. Gives up after
    /// `stall_threshold` polls.
    async fn await_cancellation(&self) {
        let Some(handle) = self.handle.as_deref() else {
            return;
        };
        for attempt in 1..=self.stall_threshold {
            match self.client.query(handle).await {
                StatusReport::Status(status) if status.is_terminal() => return,
                StatusReport::NotFound => return,
                _ => {}
            }
            if attempt < self.stall_threshold {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        tracing::warn!(job_id = %self.id, handle, "Cancelled job not reported as ended");
    }

    fn finish(&mut self, reason: TerminalReason) {
        self.state = JobState::Terminal(reason);
        self.finished_at = Some(Utc::now());
    }

    async fn read_logs(&self) -> JobLogs {
        JobLogs {
            stdout: self.take_log(&self.paths.stdout_log()).await,
            stderr: self.take_log(&self.paths.stderr_log()).await,
        }
    }

    async fn take_log(&self, path: &Path) -> Option<String> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    tracing::warn!(job_id = %self.id, path = %path.display(), error = %e, "Failed to remove log");
                }
                Some(String::from_utf8_lossy(&bytes).into_owned())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(job_id = %self.id, path = %path.display(), error = %e, "Failed to read log");
                None
            }
        }
    }

    /// Delete every artifact of this unit that is still on disk.
    pub fn remove_artifacts(&self) {
        for path in [
            &self.paths.input,
            &self.paths.script,
            &self.paths.output,
            &self.paths.stdout_log(),
            &self.paths.stderr_log(),
        ] {
            if let Err(e) = remove_if_exists(path) {
                tracing::warn!(job_id = %self.id, path = %path.display(), error = %e, "Failed to remove artifact");
            }
        }
    }
}
