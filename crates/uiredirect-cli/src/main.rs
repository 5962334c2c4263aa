use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Command};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("uiredirect=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Check { exe, signatures } => {
            if !commands::check::run(&exe, signatures.as_deref())? {
                std::process::exit(1);
            }
        }
        Command::Search { exe, pattern, limit } => commands::search::run(&exe, &pattern, limit)?,
        Command::Signatures { output } => commands::signatures::run(output.as_deref())?,
        Command::Validate { path } => commands::validate::run(&path)?,
    }

    Ok(())
}
