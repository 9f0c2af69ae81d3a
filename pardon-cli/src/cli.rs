//! CLI command definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "pardon")]
#[command(author, version, about = "Render, preview and match .https request templates", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fully render a request, failing if any hole is left unbound.
    Render(RenderArgs),
    /// Best-effort render, tolerating unbound holes.
    Preview(RenderArgs),
    /// Match a recorded request/response pair against a set of `.https` files.
    Match(MatchArgs),
}

#[derive(Parser, Debug)]
pub struct RenderArgs {
    /// `.https` source files to load; each contributes one endpoint.
    #[arg(required = true)]
    pub sources: Vec<PathBuf>,

    /// The `name:` of the endpoint to render.
    #[arg(short, long)]
    pub endpoint: String,

    /// `name=value` input bindings, repeatable.
    #[arg(short, long = "input", value_name = "name=value")]
    pub inputs: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct MatchArgs {
    /// `.https` source files to match against.
    #[arg(required = true)]
    pub sources: Vec<PathBuf>,

    /// Path to a JSON file holding the recorded request (`{method, url, headers, body?}`).
    #[arg(short, long)]
    pub request: PathBuf,

    /// Path to a JSON file holding the recorded response (`{status, headers, body?}`).
    #[arg(short = 'R', long)]
    pub response: Option<PathBuf>,
}
