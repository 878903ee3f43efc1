//! Admission control and queue consumption for conductor.
//!
//! For every project known to the source-of-truth API the scheduler runs a
//! Worker loop and a Job loop that read pending units from the project's
//! queues. A unit is only started once the [capacity::CapacityManager] for
//! its domain has confirmed, through an [admission::Gate], that the
//! substrate has room for it.

#[macro_use]
extern crate tracing;

pub mod admission;
pub mod capacity;
pub mod cli;
pub mod commands;
pub mod consumer;
pub mod projects;

mod error;
mod scheduler;

pub use error::*;
pub use scheduler::*;
