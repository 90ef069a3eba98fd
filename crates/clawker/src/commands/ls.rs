//! List managed containers

use super::connect_engine;
use anyhow::Result;
use clap::Args;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug)]
pub struct LsArgs {
    /// Include stopped containers
    #[arg(long, short = 'a')]
    pub all: bool,

    /// Only containers of this project
    #[arg(long)]
    pub project: Option<String>,
}

pub async fn execute(ctx: &CancellationToken, args: LsArgs) -> Result<()> {
    let engine = connect_engine(ctx).await?;

    let mut filters = HashMap::new();
    if let Some(project) = &args.project {
        filters.insert("label".to_string(), vec![format!("project={project}")]);
    }

    let containers = engine.list_containers(ctx, args.all, filters).await?;
    println!("{:<40} {:<12} {:<28} {}", "NAME", "STATE", "IMAGE", "STATUS");
    for container in containers {
        println!(
            "{:<40} {:<12} {:<28} {}",
            container.name, container.state, container.image, container.status
        );
    }
    Ok(())
}
