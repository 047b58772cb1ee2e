//! Test harness for orchestrator integration tests.
//!
//! Provides a fake scheduler with programmable status sequences that runs
//! each work unit in-process the first time it reports a terminal status.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use batch_map::config::BatchConfig;
use batch_map::error::{PackagerError, SubmissionError};
use batch_map::job::JobIdGenerator;
use batch_map::orchestrator::CommonVariables;
use batch_map::packager::{PackageRequest, WorkUnitPackager};
use batch_map::scheduler::{SchedulerClient, SchedulerStatus, StatusReport};
use batch_map::BatchOrchestrator;

/// Status code that makes the fake answer with an unreadable response.
pub const UNREADABLE: &str = "";
/// Status code that makes the fake answer that it does not know the job.
pub const NOT_FOUND: &str = "NOTFOUND";

pub type Computation =
    dyn Fn(&Value, Option<&CommonVariables>) -> Result<Value, String> + Send + Sync;

/// What the usage section of a simulated job report looks like.
#[derive(Debug, Clone)]
pub enum Usage {
    CpuSeconds(f64),
    Garbage,
}

/// Behaviour of one submission, selected by submission order.
#[derive(Debug, Clone)]
pub struct JobPlan {
    /// Status codes returned by successive queries; the last one repeats.
    pub statuses: Vec<&'static str>,
    pub reject_submit: bool,
    /// Text written to the error log instead of running the computation.
    pub stderr: Option<String>,
    pub skip_output: bool,
    pub usage: Usage,
}

impl Default for JobPlan {
    fn default() -> Self {
        Self {
            statuses: vec!["RUN", "DONE"],
            reject_submit: false,
            stderr: None,
            skip_output: false,
            usage: Usage::CpuSeconds(0.5),
        }
    }
}

impl JobPlan {
    pub fn statuses(statuses: Vec<&'static str>) -> Self {
        Self {
            statuses,
            ..Default::default()
        }
    }

    /// Finish after `polls` non-terminal answers.
    pub fn done_after(polls: usize) -> Self {
        let mut statuses = vec!["RUN"; polls];
        statuses.push("DONE");
        Self::statuses(statuses)
    }
}

/// Artifact paths a [`JsonPackager`] script records for the fake scheduler.
#[derive(Debug, Serialize, Deserialize)]
struct ScriptManifest {
    input: PathBuf,
    output: PathBuf,
    script: PathBuf,
    shared: Option<PathBuf>,
}

/// Packager whose "script" is a manifest of the unit's paths.
pub struct JsonPackager {
    name: String,
    /// Units whose identifier ends with one of these suffixes fail to package.
    fail_suffixes: Vec<String>,
}

impl JsonPackager {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail_suffixes: Vec::new(),
        }
    }

    pub fn failing_for(mut self, suffix: &str) -> Self {
        self.fail_suffixes.push(suffix.to_string());
        self
    }
}

impl WorkUnitPackager for JsonPackager {
    fn work_name(&self) -> &str {
        &self.name
    }

    fn package(&self, request: &PackageRequest<'_>) -> Result<String, PackagerError> {
        let script = request.script.to_string_lossy();
        if self.fail_suffixes.iter().any(|s| script.ends_with(s.as_str())) {
            return Err(PackagerError::Unsupported("computation cannot be shipped".into()));
        }
        let manifest = ScriptManifest {
            input: request.input.to_path_buf(),
            output: request.output.to_path_buf(),
            script: request.script.to_path_buf(),
            shared: request.shared_variables.map(Path::to_path_buf),
        };
        let json = serde_json::to_string(&manifest)
            .map_err(|e| PackagerError::Unsupported(e.to_string()))?;
        Ok(format!("#!/bin/sh\n{json}\n"))
    }
}

struct FakeJob {
    index: usize,
    plan: JobPlan,
    manifest: ScriptManifest,
    log_prefix: PathBuf,
    polls: usize,
    executed: bool,
    cancelled: bool,
}

#[derive(Default)]
struct FakeState {
    submissions: usize,
    jobs: HashMap<String, FakeJob>,
    job_names: Vec<String>,
    queues: Vec<String>,
    finished: Vec<usize>,
    cancelled: Vec<String>,
}

/// In-process stand-in for the cluster scheduler.
pub struct FakeScheduler {
    computation: Box<Computation>,
    plans: Mutex<HashMap<usize, JobPlan>>,
    state: Mutex<FakeState>,
}

impl FakeScheduler {
    pub fn new(
        computation: impl Fn(&Value, Option<&CommonVariables>) -> Result<Value, String>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            computation: Box::new(computation),
            plans: Mutex::new(HashMap::new()),
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Program the submission with the given zero-based index.
    pub fn plan(self, index: usize, plan: JobPlan) -> Self {
        self.plans.lock().unwrap().insert(index, plan);
        self
    }

    /// Submission indices in the order their units ran.
    pub fn finished_order(&self) -> Vec<usize> {
        self.state.lock().unwrap().finished.clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state.lock().unwrap().cancelled.clone()
    }

    pub fn job_names(&self) -> Vec<String> {
        self.state.lock().unwrap().job_names.clone()
    }

    /// Queue of every submission, in submission order.
    pub fn queues(&self) -> Vec<String> {
        self.state.lock().unwrap().queues.clone()
    }

    fn execute(&self, job: &FakeJob) {
        let stdout_log = PathBuf::from(format!("{}.o", job.log_prefix.display()));
        let stderr_log = PathBuf::from(format!("{}.e", job.log_prefix.display()));

        let mut stderr = job.plan.stderr.clone().unwrap_or_default();
        let mut printed = String::new();
        if stderr.is_empty() {
            match self.compute(&job.manifest) {
                Ok(value) => {
                    printed = format!("computed {value}");
                    if !job.plan.skip_output {
                        std::fs::write(&job.manifest.output, serde_json::to_vec(&value).unwrap())
                            .unwrap();
                    }
                    std::fs::remove_file(&job.manifest.input).unwrap();
                    std::fs::remove_file(&job.manifest.script).unwrap();
                }
                Err(message) => stderr = message,
            }
        }

        std::fs::write(&stdout_log, lsf_report(&job.plan.usage, &printed)).unwrap();
        std::fs::write(&stderr_log, stderr).unwrap();
    }

    /// The scheduler writes the report of a killed job once it is torn down.
    fn terminate(job: &FakeJob) {
        std::fs::write(
            format!("{}.o", job.log_prefix.display()),
            lsf_report(&job.plan.usage, ""),
        )
        .unwrap();
        std::fs::write(format!("{}.e", job.log_prefix.display()), "").unwrap();
    }

    fn compute(&self, manifest: &ScriptManifest) -> Result<Value, String> {
        let input: Value =
            serde_json::from_slice(&std::fs::read(&manifest.input).map_err(|e| e.to_string())?)
                .map_err(|e| e.to_string())?;
        let shared: Option<CommonVariables> = match &manifest.shared {
            Some(path) => Some(
                serde_json::from_slice(&std::fs::read(path).map_err(|e| e.to_string())?)
                    .map_err(|e| e.to_string())?,
            ),
            None => None,
        };
        (self.computation)(&input, shared.as_ref())
    }
}

#[async_trait]
impl SchedulerClient for FakeScheduler {
    async fn submit(
        &self,
        script: &Path,
        log_prefix: &Path,
        queue: &str,
        job_name: &str,
    ) -> Result<String, SubmissionError> {
        let mut state = self.state.lock().unwrap();
        let index = state.submissions;
        state.submissions += 1;
        state.job_names.push(job_name.to_string());
        state.queues.push(queue.to_string());

        let plan = self.plans.lock().unwrap().remove(&index).unwrap_or_default();
        if plan.reject_submit {
            return Err(SubmissionError::Rejected {
                command: "bsub".to_string(),
                status: "exit status: 255".to_string(),
                stderr: "Bad queue name".to_string(),
            });
        }

        let text = std::fs::read_to_string(script).expect("script written before submit");
        let manifest: ScriptManifest =
            serde_json::from_str(text.lines().nth(1).expect("manifest line")).unwrap();

        let handle = (1000 + index).to_string();
        state.jobs.insert(
            handle.clone(),
            FakeJob {
                index,
                plan,
                manifest,
                log_prefix: log_prefix.to_path_buf(),
                polls: 0,
                executed: false,
                cancelled: false,
            },
        );
        Ok(handle)
    }

    async fn query(&self, handle: &str) -> StatusReport {
        let mut state = self.state.lock().unwrap();
        let Some(job) = state.jobs.get_mut(handle) else {
            return StatusReport::NotFound;
        };

        if job.cancelled {
            if !job.executed {
                job.executed = true;
                Self::terminate(job);
            }
            return StatusReport::Status(SchedulerStatus::Exit);
        }

        let last = job.plan.statuses.len().saturating_sub(1);
        let code = job
            .plan
            .statuses
            .get(job.polls.min(last))
            .copied()
            .unwrap_or(UNREADABLE);
        job.polls += 1;

        let report = match code {
            UNREADABLE => StatusReport::Unparsable(String::new()),
            NOT_FOUND => StatusReport::NotFound,
            code => StatusReport::Status(SchedulerStatus::from_code(code)),
        };

        if report.is_terminal() && !job.executed {
            job.executed = true;
            let index = job.index;
            self.execute(job);
            state.finished.push(index);
        }
        report
    }

    /// Takes effect on the next query, which answers EXIT.
    async fn cancel(&self, handle: &str) {
        let mut state = self.state.lock().unwrap();
        state.cancelled.push(handle.to_string());
        if let Some(job) = state.jobs.get_mut(handle) {
            job.cancelled = true;
        }
    }
}

/// LSF-style job report with the given usage section.
pub fn lsf_report(usage: &Usage, printed: &str) -> String {
    let cpu_line = match usage {
        Usage::CpuSeconds(secs) => format!("    CPU time   :      {secs:.2} sec."),
        Usage::Garbage => "    CPU time   :   unavailable".to_string(),
    };
    format!(
        "Sender: LSF System <lsfadmin@node01>\n\
         Subject: Job done\n\
         \n\
         Successfully completed.\n\
         \n\
         Resource usage summary:\n\
         \n\
         {cpu_line}\n    Max Memory :         1 MB\n\
         \n\
         The output (if any) follows:\n\
         \n\
         {printed}\n\
         \n\
         PS:\n\
         \n\
         Read file <err> for stderr output of this job.\n"
    )
}

/// Config with short intervals for fast tests.
pub fn test_config(root: &Path) -> BatchConfig {
    BatchConfig::new(root)
        .with_poll_interval(Duration::from_millis(1))
        .with_job_poll_interval(Duration::from_millis(1))
        .with_stall_threshold(3)
}

#[allow(dead_code)]
pub fn orchestrator(root: &Path, scheduler: Arc<FakeScheduler>) -> BatchOrchestrator {
    orchestrator_with(test_config(root), scheduler)
}

pub fn orchestrator_with(config: BatchConfig, scheduler: Arc<FakeScheduler>) -> BatchOrchestrator {
    BatchOrchestrator::new(config, scheduler).with_id_generator(JobIdGenerator::with_owner(1000, 7))
}

/// Files left in one of the working directories.
#[allow(dead_code)]
pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
