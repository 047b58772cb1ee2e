use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::SchedulerCommands;
use crate::error::SubmissionError;
use crate::scheduler::client::{SchedulerClient, SchedulerStatus, StatusReport};

/// `bsub` acknowledges with `Job <1234> is submitted to queue <vshort>.`
const HANDLE_OPEN: char = '<';
const HANDLE_CLOSE: char = '>';
/// `bjobs` answer for a job it no longer (or not yet) knows about.
const NOT_FOUND_MARKER: &str = "is not found";
/// Status code position in the `bjobs` table: second line, third column.
const STATUS_LINE: usize = 1;
const STATUS_FIELD: usize = 2;

/// Scheduler client driving the LSF command line tools.
#[derive(Debug, Clone, Default)]
pub struct LsfClient {
    commands: SchedulerCommands,
}

impl LsfClient {
    pub fn new(commands: SchedulerCommands) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl SchedulerClient for LsfClient {
    async fn submit(
        &self,
        script: &Path,
        log_prefix: &Path,
        queue: &str,
        job_name: &str,
    ) -> Result<String, SubmissionError> {
        let stdout_log = format!("{}.o", log_prefix.display());
        let stderr_log = format!("{}.e", log_prefix.display());

        let output = Command::new(&self.commands.submit)
            .args(["-q", queue, "-J", job_name])
            .args(["-o", &stdout_log, "-e", &stderr_log])
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| SubmissionError::Spawn {
                command: self.commands.submit.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            return Err(SubmissionError::Rejected {
                command: self.commands.submit.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let handle = parse_handle(&stdout)
            .ok_or_else(|| SubmissionError::MissingHandle(stdout.to_string()))?;
        tracing::debug!(handle = %handle, queue, job_name, "Job submitted");
        Ok(handle)
    }

    async fn query(&self, handle: &str) -> StatusReport {
        let result = Command::new(&self.commands.status)
            .arg(handle)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        match result {
            Ok(output) => parse_status(
                &String::from_utf8_lossy(&output.stdout),
                &String::from_utf8_lossy(&output.stderr),
            ),
            Err(e) => {
                tracing::debug!(handle, error = %e, "Status query could not be run");
                StatusReport::Unparsable(e.to_string())
            }
        }
    }

    async fn cancel(&self, handle: &str) {
        let spawned = Command::new(&self.commands.cancel)
            .arg(handle)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            // Not awaited; tokio reaps the child once it exits.
            Ok(_child) => tracing::info!(handle, "Cancellation requested"),
            Err(e) => tracing::warn!(handle, error = %e, "Failed to request cancellation"),
        }
    }
}

/// Extract the job handle between the first `<` and the following `>`.
pub fn parse_handle(response: &str) -> Option<String> {
    let start = response.find(HANDLE_OPEN)? + HANDLE_OPEN.len_utf8();
    let len = response[start..].find(HANDLE_CLOSE)?;
    let handle = response[start..start + len].trim();
    if handle.is_empty() {
        None
    } else {
        Some(handle.to_string())
    }
}

/// Read the status code out of a `bjobs <handle>` answer.
pub fn parse_status(stdout: &str, stderr: &str) -> StatusReport {
    if stdout.trim().is_empty()
        && (stderr.contains(NOT_FOUND_MARKER) || stdout.contains(NOT_FOUND_MARKER))
    {
        return StatusReport::NotFound;
    }

    stdout
        .lines()
        .nth(STATUS_LINE)
        .and_then(|line| line.split_whitespace().nth(STATUS_FIELD))
        .map(|code| StatusReport::Status(SchedulerStatus::from_code(code)))
        .unwrap_or_else(|| StatusReport::Unparsable(stdout.to_string()))
}
