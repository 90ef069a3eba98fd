//! Command-line surface
//!
//! Thin wiring from flags onto the core contracts; all behaviour lives in
//! `clawker-core`. A Ctrl-C cancels the root token, and every command
//! threads that token through its I/O.

use crate::commands;
use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "clawker",
    version,
    about = "Project-scoped sandboxed containers for autonomous coding agents"
)]
pub struct Cli {
    /// Verbose diagnostics on stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build (if needed), create, start, and attach a container
    Run(commands::run::RunArgs),
    /// Build the project image from its configuration
    Build(commands::build::BuildArgs),
    /// List managed containers
    Ls(commands::ls::LsArgs),
    /// Stop an agent's container
    Stop(commands::stop::StopArgs),
    /// Remove an agent's container
    Rm(commands::rm::RmArgs),
    /// Remove stopped managed containers, unused volumes and networks
    Prune,
    /// Stream a container's logs
    Logs(commands::logs::LogsArgs),
    /// Manage the project registry
    Project {
        #[command(subcommand)]
        command: commands::project::ProjectCommand,
    },
    /// Drive the autonomous agent loop
    Ralph {
        #[command(subcommand)]
        command: commands::ralph::RalphCommand,
    },
}

impl Cli {
    pub async fn dispatch(self) -> Result<()> {
        let ctx = CancellationToken::new();
        let signal_token = ctx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                signal_token.cancel();
            }
        });

        match self.command {
            Command::Run(args) => commands::run::execute(&ctx, args).await,
            Command::Build(args) => commands::build::execute(&ctx, args).await,
            Command::Ls(args) => commands::ls::execute(&ctx, args).await,
            Command::Stop(args) => commands::stop::execute(&ctx, args).await,
            Command::Rm(args) => commands::rm::execute(&ctx, args).await,
            Command::Prune => commands::prune::execute(&ctx).await,
            Command::Logs(args) => commands::logs::execute(&ctx, args).await,
            Command::Project { command } => commands::project::execute(command).await,
            Command::Ralph { command } => commands::ralph::execute(&ctx, command).await,
        }
    }
}
