pub mod config;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod packager;
pub mod scheduler;
pub mod shutdown;

pub use orchestrator::{BatchOrchestrator, BatchReport, JobOutcome};
