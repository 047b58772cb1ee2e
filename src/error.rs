use std::path::PathBuf;

use thiserror::Error;

/// Process-fatal errors of a batch call.
///
/// Everything that can go wrong with a single job is reported through
/// [`JobOutcome`](crate::orchestrator::JobOutcome) instead; only failures that
/// leave the whole batch without a consistent workspace end up here.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Failed to prepare working directory {path}: {source}")]
    Setup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write artifact {path}: {source}")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize {what}: {source}")]
    Serialize {
        what: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The scheduler did not accept a job.
#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("Failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    Rejected {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("No job handle in submit response: {0:?}")]
    MissingHandle(String),

    #[error("Could not package work unit: {0}")]
    Packaging(#[from] PackagerError),

    #[error("Job was already submitted with handle {0}")]
    AlreadySubmitted(String),
}

/// The resource-usage report of a job did not have the expected shape.
#[derive(Error, Debug, PartialEq)]
pub enum UsageParseError {
    #[error("Report has no `{0}` marker")]
    MissingMarker(&'static str),

    #[error("CPU time {0:?} is not a number")]
    InvalidCpuTime(String),
}

#[derive(Error, Debug)]
pub enum PackagerError {
    #[error("Path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),

    #[error("Work unit cannot be packaged: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, BatchError>;
