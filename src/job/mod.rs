//! A single work unit and everything identifying it.
//!
//! - [`JobIdGenerator`] / [`BatchIds`]: unique, sortable identifiers
//! - [`ArtifactLayout`] / [`WorkUnitPaths`]: where a unit's files live
//! - [`RemoteJob`]: lifecycle of one submitted unit

pub mod artifact;
pub mod id;
pub mod remote;

pub use artifact::{ArtifactLayout, WorkUnitPaths};
pub use id::{BatchIds, JobId, JobIdGenerator};
pub use remote::{JobLogs, JobState, RemoteJob, TerminalReason};
