//! Access to the external batch scheduler.
//!
//! - [`SchedulerClient`]: submit / query / cancel, the seam the rest of the
//!   crate depends on
//! - [`LsfClient`]: implementation on top of `bsub`, `bjobs` and `bkill`
//! - [`usage`]: reading CPU time and program output out of LSF job reports

pub mod client;
pub mod lsf;
pub mod usage;

pub use client::{SchedulerClient, SchedulerStatus, StatusReport};
pub use lsf::LsfClient;
