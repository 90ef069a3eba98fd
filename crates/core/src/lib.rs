//! Core library for the clawker CLI
//!
//! Clawker provisions, runs, and supervises project-scoped sandboxed
//! containers hosting an autonomous coding agent. This crate holds the
//! engine wrapper, naming and labels, the image builder, project
//! resolution, workspace strategies, the host proxy, the attach pipeline,
//! the run orchestrator, and the Ralph loop engine.

pub mod attach;
pub mod build_context;
pub mod config;
pub mod dockerfile;
pub mod engine;
pub mod errors;
pub mod firewall;
pub mod host_proxy;
pub mod lifecycle;
pub mod logging;
pub mod naming;
pub mod paths;
pub mod ralph;
pub mod registry;
pub mod resolver;
pub mod scripts;
pub mod workspace;

// Re-export IndexMap for dependent crates (ordered maps in the config model)
pub use indexmap::IndexMap;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let version = version();
        assert!(!version.is_empty());
        assert!(version.contains('.'));
    }
}
