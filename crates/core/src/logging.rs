//! Logging and observability
//!
//! Structured logging via tracing. Human diagnostics go to stderr so that
//! stdout stays reserved for data payloads (container ids, loop-result JSON).

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging system with the default `info` filter
pub fn init() -> anyhow::Result<()> {
    init_with_default("info")
}

/// Initialize the logging system.
///
/// `RUST_LOG` overrides `default_filter` when set.
pub fn init_with_default(default_filter: &str) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();
    Ok(())
}
