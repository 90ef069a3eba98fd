//! Build command: render the Dockerfile and build the project image

use super::{connect_engine, resolve_here};
use anyhow::Result;
use clap::Args;
use clawker_core::lifecycle;
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Print the rendered Dockerfile instead of building
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn execute(ctx: &CancellationToken, args: BuildArgs) -> Result<()> {
    let (_resolution, config) = resolve_here(true)?;

    if args.dry_run {
        let rendered = clawker_core::dockerfile::render(&config, &config.build.image)?;
        print!("{rendered}");
        return Ok(());
    }

    let engine = connect_engine(ctx).await?;
    let tag = lifecycle::build_image(ctx, &engine, &config).await?;
    println!("{tag}");
    Ok(())
}
