//! Prune stopped managed containers, unused volumes and networks

use super::connect_engine;
use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub async fn execute(ctx: &CancellationToken) -> Result<()> {
    let engine = connect_engine(ctx).await?;

    let containers = engine.prune_containers(ctx).await?;
    let volumes = engine.prune_volumes(ctx).await?;
    let networks = engine.prune_networks(ctx).await?;
    info!(
        containers = containers.len(),
        volumes = volumes.len(),
        networks = networks.len(),
        "prune complete"
    );
    for name in containers.iter().chain(&volumes).chain(&networks) {
        println!("{name}");
    }
    Ok(())
}
