//! Helpers to wrangle logging across conductor crates
//! NOTE: [initialize_tracing] should only ever be called in tests or binaries;
//! a library should only concern itself with instrumentation and logging.
use std::sync::Once;

static INITIALIZE_TRACING: Once = Once::new();

const DEFAULT_FILTER: &str = concat!(
    "conductor=info,conductor_scheduler=info,conductor_queue=info,",
    "conductor_api=info,conductor_common=info"
);

/// Install a global `tracing` subscriber. The filter is taken from `filter`
/// if given, otherwise from `RUST_LOG`, otherwise a sensible default. Only
/// the first call in a process has any effect.
pub fn initialize_tracing(filter: Option<&str>) {
    use tracing_subscriber::prelude::*;

    INITIALIZE_TRACING.call_once(|| {
        let directives = match filter {
            Some(filter) => filter.to_owned(),
            None => std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_FILTER.into()),
        };

        let subscriber = tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new(directives))
            .with(tracing_subscriber::fmt::layer());

        // Tests may race another subscriber into place
        if subscriber.try_init().is_err() {
            eprintln!("A global tracing subscriber was already installed");
        }
    });
}
