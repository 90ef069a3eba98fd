use clap::Parser;
use std::process::ExitCode;

mod cli;
mod commands;

#[tokio::main]
async fn main() -> ExitCode {
    let parsed = cli::Cli::parse();

    let default_filter = if parsed.verbose { "debug" } else { "info" };
    if let Err(e) = clawker_core::logging::init_with_default(default_filter) {
        eprintln!("error: {e:#}");
        return ExitCode::FAILURE;
    }

    match parsed.dispatch().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
