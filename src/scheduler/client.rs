use std::fmt;
use std::path::Path;

use async_trait::async_trait;

use crate::error::SubmissionError;

/// Job state as reported by the scheduler, normalized across code spellings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerStatus {
    Pending,
    Running,
    Suspended,
    Done,
    Exit,
    Other(String),
}

impl SchedulerStatus {
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "PEND" | "PENDING" | "WAIT" => SchedulerStatus::Pending,
            "RUN" | "RUNNING" => SchedulerStatus::Running,
            "PSUSP" | "USUSP" | "SSUSP" => SchedulerStatus::Suspended,
            "DONE" => SchedulerStatus::Done,
            "EXIT" => SchedulerStatus::Exit,
            other => SchedulerStatus::Other(other.to_string()),
        }
    }

    /// The job will not progress any further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SchedulerStatus::Done | SchedulerStatus::Exit)
    }
}

impl fmt::Display for SchedulerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerStatus::Pending => write!(f, "PEND"),
            SchedulerStatus::Running => write!(f, "RUN"),
            SchedulerStatus::Suspended => write!(f, "SUSP"),
            SchedulerStatus::Done => write!(f, "DONE"),
            SchedulerStatus::Exit => write!(f, "EXIT"),
            SchedulerStatus::Other(code) => write!(f, "{code}"),
        }
    }
}

/// Answer to a status query.
///
/// A response that cannot be read is not an error: right after submission
/// the scheduler may not list the job yet. Callers decide when repeated
/// `Unparsable` or `NotFound` answers mean trouble.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusReport {
    Status(SchedulerStatus),
    NotFound,
    Unparsable(String),
}

impl StatusReport {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StatusReport::Status(s) if s.is_terminal())
    }
}

/// Operations the orchestrator needs from a batch scheduler.
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    /// Submit `script` to `queue`, logging to `<log_prefix>.o` / `<log_prefix>.e`.
    /// Returns the scheduler's handle for the job.
    async fn submit(
        &self,
        script: &Path,
        log_prefix: &Path,
        queue: &str,
        job_name: &str,
    ) -> Result<String, SubmissionError>;

    async fn query(&self, handle: &str) -> StatusReport;

    /// Request cancellation without waiting for it to take effect.
    async fn cancel(&self, handle: &str);
}
