//! Stop an agent's container

use super::{connect_engine, resolve_here};
use anyhow::Result;
use clap::Args;
use clawker_core::naming;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Agent name within the project
    #[arg(default_value = "ralph")]
    pub agent: String,

    /// Grace period in seconds before the daemon escalates
    #[arg(long, short = 't', default_value_t = 10)]
    pub timeout: i64,

    /// Send SIGKILL immediately instead of a graceful stop
    #[arg(long)]
    pub kill: bool,
}

pub async fn execute(ctx: &CancellationToken, args: StopArgs) -> Result<()> {
    let engine = connect_engine(ctx).await?;
    let (resolution, _config) = resolve_here(true)?;

    let name = naming::container_name(&resolution.project, &args.agent);
    if args.kill {
        engine.kill_container(ctx, &name).await?;
    } else {
        engine.stop_container(ctx, &name, args.timeout).await?;
    }
    info!(container = %name, "stopped");
    Ok(())
}
