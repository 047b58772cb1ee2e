//! Running a whole batch: one job per input, results in input order.
//!
//! # Flow
//!
//! 1. Working directories are created if missing
//! 2. Shared variables, every input artifact and every script are written
//!    before anything is submitted
//! 3. One [`RemoteJob`] per input is submitted
//! 4. Pending jobs are polled every `poll_interval`; each job that turns
//!    terminal has its logs read, is classified, and contributes its CPU time
//! 5. Outputs are loaded in input order, a missing output becomes `None`
//!
//! A failing job only ever affects its own position in the results, and that
//! includes a unit whose input or script could not be written. An interrupt
//! or an expired deadline cancels the jobs still pending, waits for the
//! scheduler to report them ended, and then collects everything that did
//! finish.

pub mod metrics;

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::BatchConfig;
use crate::error::{BatchError, Result, SubmissionError};
use crate::job::artifact::{remove_if_exists, ArtifactLayout};
use crate::job::id::{JobId, JobIdGenerator};
use crate::job::remote::{JobLogs, JobState, RemoteJob, TerminalReason};
use crate::packager::{PackageRequest, WorkUnitPackager};
use crate::scheduler::{usage, LsfClient, SchedulerClient, SchedulerStatus};

pub use metrics::BatchMetrics;

/// Variables shared by every work unit of a batch.
pub type CommonVariables = serde_json::Map<String, serde_json::Value>;

/// How a single job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    /// The unit wrote to its error stream, or the scheduler reported EXIT.
    Failed { stderr: String },
    SubmissionFailed { reason: String },
    Cancelled,
    Lost,
    /// Status answers stayed unreadable and the job was given up on.
    Stalled,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded)
    }
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutcome::Succeeded => write!(f, "succeeded"),
            JobOutcome::Failed { .. } => write!(f, "failed"),
            JobOutcome::SubmissionFailed { .. } => write!(f, "submission failed"),
            JobOutcome::Cancelled => write!(f, "cancelled"),
            JobOutcome::Lost => write!(f, "lost"),
            JobOutcome::Stalled => write!(f, "stalled"),
        }
    }
}

/// Per-job summary, in input order.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub handle: Option<String>,
    pub outcome: JobOutcome,
    /// `None` when the usage report was missing or unreadable
    pub cpu_time: Option<Duration>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct BatchReport<O> {
    /// One entry per input, `None` where the job produced no usable output
    pub results: Vec<Option<O>>,
    pub jobs: Vec<JobRecord>,
    pub metrics: BatchMetrics,
    /// An interrupt cancelled the jobs still pending
    pub interrupted: bool,
    /// The configured deadline cancelled the jobs still pending
    pub timed_out: bool,
}

/// Drives batches of [`RemoteJob`]s against one scheduler.
pub struct BatchOrchestrator {
    config: BatchConfig,
    layout: ArtifactLayout,
    client: Arc<dyn SchedulerClient>,
    ids: JobIdGenerator,
}

impl BatchOrchestrator {
    pub fn new(config: BatchConfig, client: Arc<dyn SchedulerClient>) -> Self {
        Self {
            layout: ArtifactLayout::new(&config.root),
            config,
            client,
            ids: JobIdGenerator::new(),
        }
    }

    /// Orchestrator talking to LSF through the configured commands.
    pub fn lsf(config: BatchConfig) -> Self {
        let client = Arc::new(LsfClient::new(config.commands.clone()));
        Self::new(config, client)
    }

    pub fn with_id_generator(mut self, ids: JobIdGenerator) -> Self {
        self.ids = ids;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Run `packager`'s computation once per input and wait for all of it.
    ///
    /// `queue` falls back to the configured default queue.
    pub async fn run<I, O>(
        &mut self,
        packager: &dyn WorkUnitPackager,
        inputs: &[I],
        common: Option<&CommonVariables>,
        queue: Option<&str>,
    ) -> Result<BatchReport<O>>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        self.run_with_shutdown(packager, inputs, common, queue, &CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run); when `shutdown` fires, pending jobs are
    /// cancelled and the finished ones are still collected.
    pub async fn run_with_shutdown<I, O>(
        &mut self,
        packager: &dyn WorkUnitPackager,
        inputs: &[I],
        common: Option<&CommonVariables>,
        queue: Option<&str>,
        shutdown: &CancellationToken,
    ) -> Result<BatchReport<O>>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let started = Instant::now();
        let queue = queue.unwrap_or(self.config.default_queue.as_str()).to_string();

        self.layout.ensure_dirs()?;

        let encoded = inputs
            .iter()
            .enumerate()
            .map(|(i, input)| {
                serde_json::to_vec(input).map_err(|source| BatchError::Serialize {
                    what: format!("input {i}"),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut batch_ids = self.ids.next_batch(packager.work_name());
        let shared = match common {
            Some(vars) => Some(self.write_shared_variables(&batch_ids.prefix(), vars)?),
            None => None,
        };

        let mut jobs = Vec::with_capacity(encoded.len());
        let mut unit_failures = Vec::with_capacity(encoded.len());
        for bytes in &encoded {
            let id = batch_ids.next_id();
            let paths = self.layout.unit(&id);
            let job = RemoteJob::new(id, paths, &queue, self.client.clone(), &self.config);
            unit_failures.push(prepare_unit(&job, bytes, packager, shared.as_deref()));
            jobs.push(job);
        }

        tracing::info!(
            batch = batch_ids.batch_seq(),
            jobs = jobs.len(),
            queue = %queue,
            work = packager.work_name(),
            "Submitting batch"
        );
        for (job, failure) in jobs.iter_mut().zip(unit_failures) {
            match failure {
                Some(reason) => job.fail_submission(reason),
                // Failures are recorded on the job itself.
                None => {
                    let _ = job.submit().await;
                }
            }
        }

        let mut records: Vec<Option<JobRecord>> = vec![None; jobs.len()];
        let mut cpu_total = Duration::ZERO;
        let deadline = self.config.timeout.map(|t| started + t);
        let mut interrupted = false;
        let mut timed_out = false;

        let mut pending: Vec<usize> = (0..jobs.len()).collect();
        loop {
            let mut still_pending = Vec::with_capacity(pending.len());
            for idx in pending {
                let job = &mut jobs[idx];
                if job.poll().await {
                    let logs = job.communicate().await;
                    let record = finish_job(job, &logs);
                    cpu_total += record.cpu_time.unwrap_or_default();
                    records[idx] = Some(record);
                } else {
                    still_pending.push(idx);
                }
            }
            pending = still_pending;

            if pending.is_empty() {
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                tracing::warn!(pending = pending.len(), "Batch deadline exceeded, cancelling pending jobs");
                timed_out = true;
                break;
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::warn!(pending = pending.len(), "Interrupted, cancelling pending jobs");
                    interrupted = true;
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        // Every pending job is cancelled before waiting on any of them.
        for &idx in &pending {
            jobs[idx].request_cancel().await;
        }
        for idx in pending {
            let job = &mut jobs[idx];
            let logs = job.kill().await;
            let record = finish_job(job, &logs);
            cpu_total += record.cpu_time.unwrap_or_default();
            records[idx] = Some(record);
        }

        let mut results = Vec::with_capacity(jobs.len());
        for (job, record) in jobs.iter().zip(&records) {
            let expected = record.as_ref().is_some_and(|r| r.outcome.is_success());
            results.push(load_output::<O>(job, expected).await);
            job.remove_artifacts();
        }

        if let Some(path) = &shared {
            if let Err(e) = remove_if_exists(path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove shared variables");
            }
        }

        let metrics = BatchMetrics::new(started.elapsed(), cpu_total);
        tracing::warn!("{}", metrics);

        Ok(BatchReport {
            results,
            jobs: records.into_iter().flatten().collect(),
            metrics,
            interrupted,
            timed_out,
        })
    }

    fn write_shared_variables(&self, prefix: &str, vars: &CommonVariables) -> Result<PathBuf> {
        let path = self.layout.shared_variables(prefix);
        let bytes = serde_json::to_vec(vars).map_err(|source| BatchError::Serialize {
            what: "common variables".to_string(),
            source,
        })?;
        std::fs::write(&path, bytes).map_err(|source| BatchError::ArtifactWrite {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

/// Write a unit's input and script. Returns why the unit cannot be submitted,
/// if anything went wrong; that only concerns this unit.
fn prepare_unit(
    job: &RemoteJob,
    input: &[u8],
    packager: &dyn WorkUnitPackager,
    shared: Option<&Path>,
) -> Option<String> {
    let paths = job.paths();
    if let Err(e) = write_artifact(&paths.input, input) {
        return Some(e.to_string());
    }

    let request = PackageRequest {
        input: &paths.input,
        output: &paths.output,
        script: &paths.script,
        shared_variables: shared,
    };
    let script = match packager.package(&request) {
        Ok(script) => script,
        Err(e) => return Some(SubmissionError::from(e).to_string()),
    };

    let written = write_artifact(&paths.script, script.as_bytes()).and_then(|()| {
        make_executable(&paths.script).map_err(|source| BatchError::ArtifactWrite {
            path: paths.script.clone(),
            source,
        })
    });
    written.err().map(|e| e.to_string())
}

fn write_artifact(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes).map_err(|source| BatchError::ArtifactWrite {
        path: path.to_path_buf(),
        source,
    })
}

fn make_executable(path: &Path) -> io::Result<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o111);
    std::fs::set_permissions(path, perms)
}

/// Classify a terminal job and pull its CPU time out of the usage report.
fn finish_job(job: &RemoteJob, logs: &JobLogs) -> JobRecord {
    let outcome = match job.state() {
        JobState::Terminal(TerminalReason::SubmissionFailed(reason)) => JobOutcome::SubmissionFailed {
            reason: reason.clone(),
        },
        JobState::Terminal(TerminalReason::Cancelled) => JobOutcome::Cancelled,
        JobState::Terminal(TerminalReason::Lost) => JobOutcome::Lost,
        JobState::Terminal(TerminalReason::Stalled) => JobOutcome::Stalled,
        JobState::Terminal(TerminalReason::Finished(status)) => match logs.stderr.as_deref() {
            Some(stderr) if !stderr.trim().is_empty() => JobOutcome::Failed {
                stderr: stderr.to_string(),
            },
            _ if *status == SchedulerStatus::Exit => JobOutcome::Failed {
                stderr: String::new(),
            },
            _ => JobOutcome::Succeeded,
        },
        JobState::Unsubmitted | JobState::Submitted => JobOutcome::Lost,
    };

    let cpu_time = match logs.stdout.as_deref() {
        Some(report) => {
            if let Some(output) = usage::program_output(report) {
                tracing::debug!(job_id = %job.id(), output, "Job output");
            }
            match usage::cpu_time(report) {
                Ok(cpu) => Some(cpu),
                Err(e) => {
                    tracing::warn!(job_id = %job.id(), error = %e, "Could not read usage, CPU time not available");
                    None
                }
            }
        }
        None => {
            if !matches!(outcome, JobOutcome::SubmissionFailed { .. }) {
                tracing::warn!(job_id = %job.id(), "No job report, CPU time not available");
            }
            None
        }
    };

    match &outcome {
        JobOutcome::Failed { stderr } => {
            tracing::error!(job_id = %job.id(), stderr = %stderr.trim(), "Job finished with error")
        }
        JobOutcome::Succeeded => tracing::info!(job_id = %job.id(), "Job finished"),
        other => tracing::info!(job_id = %job.id(), outcome = %other, "Job ended"),
    }

    JobRecord {
        id: job.id().clone(),
        handle: job.handle().map(str::to_string),
        outcome,
        cpu_time,
        submitted_at: job.submitted_at(),
        finished_at: job.finished_at(),
    }
}

/// Read a unit's output artifact; anything other than a decodable value is
/// `None`.
async fn load_output<O: DeserializeOwned>(job: &RemoteJob, expected: bool) -> Option<O> {
    let path = &job.paths().output;
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(job_id = %job.id(), error = %e, "Output could not be decoded");
                None
            }
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if expected {
                tracing::warn!(job_id = %job.id(), path = %path.display(), "Missing output");
            }
            None
        }
        Err(e) => {
            tracing::error!(job_id = %job.id(), error = %e, "Output could not be read");
            None
        }
    }
}
