//! Types and a client for the source-of-truth API consulted by the conductor
//! scheduler. The scheduler never owns event, project or substrate state; it
//! reads that state and requests transitions through the traits in this
//! crate, which [Client] implements over HTTP.

#[macro_use]
extern crate tracing;

mod client;
pub mod data;
mod error;
mod interface;
pub mod route;

pub use client::*;
pub use error::*;
pub use interface::*;
