//! Command-line harness for rendering, previewing and matching `.https`
//! request templates.

#![allow(clippy::result_large_err)]

mod cli;
mod commands;
mod error;

use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<(), error::Error> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_env("PARDON_LOG"))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Render(args) => commands::render(args),
        Commands::Preview(args) => commands::preview(args),
        Commands::Match(args) => commands::run_match(args),
    }
}
