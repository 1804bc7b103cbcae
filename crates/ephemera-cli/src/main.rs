mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { stack, suffix } => {
            commands::run(stack, suffix, cli.subscription, cli.tenant, cli.output).await
        }
        Command::Up { stack, suffix } => commands::up(stack, suffix, cli.output).await,
        Command::Down { stack, suffix } => commands::down(stack, suffix).await,
        Command::Validate { path } => commands::validate(path).await,
    }
}
