//! Command implementations
//!
//! Each subcommand wires parsed flags onto `clawker-core` contracts. Human
//! diagnostics go to stderr via tracing; stdout carries data payloads only
//! (container ids, tags, loop-result JSON).

pub mod build;
pub mod logs;
pub mod ls;
pub mod project;
pub mod prune;
pub mod ralph;
pub mod rm;
pub mod run;
pub mod stop;

use anyhow::{Context, Result};
use clawker_core::config::Config;
use clawker_core::engine::Engine;
use clawker_core::registry::ProjectRegistry;
use clawker_core::resolver::{self, Resolution};
use tokio_util::sync::CancellationToken;

/// Connect to the engine and verify it answers within the ping deadline
pub(crate) async fn connect_engine(ctx: &CancellationToken) -> Result<Engine> {
    let engine = Engine::connect().context("cannot reach the container engine")?;
    engine.ping(ctx).await?;
    Ok(engine)
}

/// Resolve the current working directory to a project and load its config
pub(crate) fn resolve_here(allow_anonymous: bool) -> Result<(Resolution, Config)> {
    let registry = ProjectRegistry::load(&clawker_core::paths::registry_path()?)?;
    let workdir = std::env::current_dir().context("cannot determine working directory")?;
    let resolution = resolver::resolve(&workdir, &registry, allow_anonymous)?;
    let config = resolver::load_config(&resolution)?;
    Ok((resolution, config))
}
