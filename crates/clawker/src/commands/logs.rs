//! Stream a container's logs to the local stdout/stderr

use super::{connect_engine, resolve_here};
use anyhow::Result;
use clap::Args;
use clawker_core::attach::route_frames;
use clawker_core::naming;
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Agent name within the project
    #[arg(default_value = "ralph")]
    pub agent: String,

    /// Keep following new output
    #[arg(long, short = 'f')]
    pub follow: bool,

    /// Only the last N lines
    #[arg(long)]
    pub tail: Option<String>,
}

pub async fn execute(ctx: &CancellationToken, args: LogsArgs) -> Result<()> {
    let engine = connect_engine(ctx).await?;
    let (resolution, _config) = resolve_here(true)?;

    let name = naming::container_name(&resolution.project, &args.agent);
    let frames = engine.container_logs(&name, args.follow, args.tail);
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();

    tokio::select! {
        _ = ctx.cancelled() => Ok(()),
        routed = route_frames(Box::pin(frames), &mut stdout, &mut stderr) => Ok(routed?),
    }
}
