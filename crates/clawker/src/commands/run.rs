//! Run command: the full create → start → attach flow

use super::{connect_engine, resolve_here};
use anyhow::Result;
use clap::Args;
use clawker_core::config::WorkspaceMode;
use clawker_core::lifecycle::{self, RunRequest};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Agent name within the project
    #[arg(long, default_value = "ralph")]
    pub agent: String,

    /// Image reference; `@` means the project's generated image
    #[arg(long, default_value = "@")]
    pub image: String,

    /// Workspace strategy (bind or snapshot); defaults to the config
    #[arg(long)]
    pub mode: Option<String>,

    /// Start detached and print the container id
    #[arg(long, short = 'd')]
    pub detach: bool,

    /// Remove the container when it exits
    #[arg(long = "rm")]
    pub auto_remove: bool,

    /// Extra environment entries, KEY=value
    #[arg(long = "env", short = 'e')]
    pub env: Vec<String>,

    /// Detach key sequence override (daemon syntax)
    #[arg(long)]
    pub detach_keys: Option<String>,

    /// Command to run instead of the image default
    #[arg(trailing_var_arg = true)]
    pub cmd: Vec<String>,
}

pub async fn execute(ctx: &CancellationToken, args: RunArgs) -> Result<()> {
    let engine = connect_engine(ctx).await?;
    let (resolution, config) = resolve_here(true)?;

    let mode = match args.mode.as_deref() {
        Some(raw) => Some(raw.parse::<WorkspaceMode>()?),
        None => None,
    };

    let request = RunRequest {
        agent: args.agent,
        image: args.image,
        mode,
        detach: args.detach,
        auto_remove: args.auto_remove,
        cmd: args.cmd,
        env: args.env,
        detach_keys: args.detach_keys,
    };

    let result =
        lifecycle::run_container(ctx, &engine, &config, &resolution.workdir, request).await?;

    if result.outcome.is_none() {
        // Detached: the id is the data payload.
        println!("{}", result.container_id);
    } else {
        info!(container = %result.container_id, outcome = ?result.outcome, "run finished");
    }
    Ok(())
}
