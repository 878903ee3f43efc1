//! A durable-queue client for the conductor scheduler.
//!
//! Consumers and producers never share broker sessions: every [Reader] and
//! [Writer] handed out by a [ReaderFactory] / [WriterFactory] owns its own
//! session and link, while the underlying broker connection is shared by the
//! factory and re-established under its lock whenever it goes stale.

#[macro_use]
extern crate tracing;

mod amqp;
mod error;
mod interface;
mod message;
mod session;

#[cfg(any(test, feature = "helpers"))]
pub mod memory;

pub use amqp::*;
pub use error::*;
pub use interface::*;
pub use message::*;

/// Queue used exclusively for liveness probing.
pub const HEALTHZ_QUEUE: &str = "healthz";

/// Name of the queue that carries pending Worker event IDs for a project.
pub fn worker_queue_name(project_id: &str) -> String {
    format!("workers.{project_id}")
}

/// Name of the queue that carries pending `eventID:jobName` pairs for a
/// project.
pub fn job_queue_name(project_id: &str) -> String {
    format!("jobs.{project_id}")
}
