//! Remove an agent's container

use super::{connect_engine, resolve_here};
use anyhow::Result;
use clap::Args;
use clawker_core::naming;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Args, Debug)]
pub struct RmArgs {
    /// Agent name within the project
    #[arg(default_value = "ralph")]
    pub agent: String,

    /// Remove even when running
    #[arg(long, short = 'f')]
    pub force: bool,
}

pub async fn execute(ctx: &CancellationToken, args: RmArgs) -> Result<()> {
    let engine = connect_engine(ctx).await?;
    let (resolution, _config) = resolve_here(true)?;

    let name = naming::container_name(&resolution.project, &args.agent);
    engine.remove_container(ctx, &name, args.force).await?;
    info!(container = %name, "removed");
    Ok(())
}
