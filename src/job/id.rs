use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one work unit, embedded in every artifact file name.
///
/// Rendered as `<uid>_p<pid>_b<batch>_<name>_j<job>` with zero-padded
/// counters, so identifiers of one batch sort in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Wrap an already rendered identifier, e.g. one recovered from a file name.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hands out batch sequences for one process.
///
/// Owned by the orchestrator; every batch call takes the next batch number,
/// so identifiers are never reused while the process lives. Owner and
/// process ids keep concurrent processes of the same user apart.
#[derive(Debug)]
pub struct JobIdGenerator {
    owner: u32,
    process: u32,
    next_batch: u64,
}

impl Default for JobIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl JobIdGenerator {
    pub fn new() -> Self {
        Self::with_owner(nix::unistd::getuid().as_raw(), std::process::id())
    }

    pub fn with_owner(owner: u32, process: u32) -> Self {
        Self {
            owner,
            process,
            next_batch: 0,
        }
    }

    /// Start a new batch for `work_name`.
    pub fn next_batch(&mut self, work_name: &str) -> BatchIds {
        let batch = self.next_batch;
        self.next_batch += 1;
        BatchIds {
            owner: self.owner,
            process: self.process,
            batch,
            name: sanitize(work_name),
            next_job: 0,
        }
    }
}

/// Per-batch identifier sequence. Infinite: `next()` never returns `None`.
#[derive(Debug)]
pub struct BatchIds {
    owner: u32,
    process: u32,
    batch: u64,
    name: String,
    next_job: u64,
}

impl BatchIds {
    pub fn batch_seq(&self) -> u64 {
        self.batch
    }

    /// Prefix shared by every identifier of this batch, also used to name
    /// batch-wide artifacts.
    pub fn prefix(&self) -> String {
        format!("{}_p{}_b{:06}", self.owner, self.process, self.batch)
    }

    pub fn next_id(&mut self) -> JobId {
        let job = self.next_job;
        self.next_job += 1;
        JobId(format!("{}_{}_j{:06}", self.prefix(), self.name, job))
    }
}

impl Iterator for BatchIds {
    type Item = JobId;

    fn next(&mut self) -> Option<JobId> {
        Some(self.next_id())
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "work".to_string()
    } else {
        cleaned
    }
}
