//! Common, generic utilities that are shared across other conductor packages.
#![warn(missing_docs)]

#[macro_use]
extern crate tracing as extern_tracing;

mod retry;
pub mod tracing;

pub use retry::*;

#[cfg(any(test, feature = "helpers"))]
pub mod helpers;
