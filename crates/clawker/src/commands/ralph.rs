//! Ralph loop commands

use super::{connect_engine, resolve_here};
use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use clawker_core::naming;
use clawker_core::ralph::{ExitReason, LoopOptions, Ralph, SessionStore};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Subcommand, Debug)]
pub enum RalphCommand {
    /// Run the agent loop against a running container
    Run(RalphRunArgs),
    /// Print session and circuit state
    Status(RalphStatusArgs),
    /// Clear session history and close the circuit breaker
    Reset(RalphStatusArgs),
}

#[derive(Args, Debug)]
pub struct RalphRunArgs {
    /// Agent name within the project
    #[arg(long, default_value = "ralph")]
    pub agent: String,

    /// Prompt appended to the first invocation
    #[arg(long, short = 'p')]
    pub prompt: Option<String>,

    /// Override the configured maximum loop count
    #[arg(long)]
    pub max_loops: Option<u32>,
}

#[derive(Args, Debug)]
pub struct RalphStatusArgs {
    /// Agent name within the project
    #[arg(long, default_value = "ralph")]
    pub agent: String,
}

pub async fn execute(ctx: &CancellationToken, command: RalphCommand) -> Result<()> {
    match command {
        RalphCommand::Run(args) => run(ctx, args).await,
        RalphCommand::Status(args) => status(args),
        RalphCommand::Reset(args) => reset(args),
    }
}

async fn run(ctx: &CancellationToken, args: RalphRunArgs) -> Result<()> {
    let engine = connect_engine(ctx).await?;
    let (resolution, config) = resolve_here(true)?;

    let container = naming::container_name(&resolution.project, &args.agent);
    let mut options = LoopOptions::from_config(&config, &container, &args.agent, args.prompt);
    if let Some(max_loops) = args.max_loops {
        options.max_loops = max_loops;
    }

    let ralph = Ralph::new(engine, SessionStore::new()?);
    let hook = Box::new(|loop_count: u32, status: &clawker_core::ralph::RalphStatus| {
        info!(
            loop_count,
            tasks = status.tasks_completed,
            files = status.files_modified,
            "loop finished"
        );
    });
    let result = ralph.run(ctx, options, Some(hook)).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.reason == ExitReason::CircuitTripped {
        bail!(
            "circuit breaker tripped: {}",
            result.error.as_deref().unwrap_or("stagnation threshold reached")
        );
    }
    Ok(())
}

fn status(args: RalphStatusArgs) -> Result<()> {
    let (resolution, _config) = resolve_here(true)?;
    let store = SessionStore::new()?;
    let session = store.load_session(&resolution.project, &args.agent)?;
    let circuit = store.load_circuit(&resolution.project, &args.agent)?;
    let payload = serde_json::json!({
        "session": session,
        "circuit": circuit,
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn reset(args: RalphStatusArgs) -> Result<()> {
    let (resolution, _config) = resolve_here(true)?;
    let store = SessionStore::new()?;
    let _lock = store.lock_pair(&resolution.project, &args.agent)?;
    store.delete_session(&resolution.project, &args.agent)?;
    store.delete_circuit(&resolution.project, &args.agent)?;
    info!(agent = %args.agent, "loop state reset");
    Ok(())
}
