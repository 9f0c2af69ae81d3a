//! Command implementations invoked from `main`.

use std::path::Path;

use pardon::Engine;
use snafu::ResultExt;
use tracing::info;

use crate::cli::{MatchArgs, RenderArgs};
use crate::error::{Error, InputPairCtx, ReadCtx};

fn read_source(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).context(ReadCtx { path: path.to_path_buf() })
}

fn build_engine(sources: &[std::path::PathBuf]) -> Result<Engine, Error> {
    let mut build = Engine::builder();
    for path in sources {
        build = build.source(read_source(path)?);
    }
    Ok(build.finish()?)
}

fn parse_inputs(pairs: &[String]) -> Result<Vec<(&str, &str)>, Error> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .ok_or_else(|| InputPairCtx { pair: pair.clone() }.build())
        })
        .collect()
}

/// Runs the `render` subcommand: full render, failing on any unbound hole.
pub fn render(args: RenderArgs) -> Result<(), Error> {
    let engine = build_engine(&args.sources)?;
    let inputs = parse_inputs(&args.inputs)?;
    info!(endpoint = %args.endpoint, "rendering request");
    let envelope = engine.render(&args.endpoint, &inputs)?;
    let json = serde_json::to_string_pretty(&envelope).context(crate::error::SerializeCtx)?;
    println!("{json}");
    Ok(())
}

/// Runs the `preview` subcommand: best-effort render tolerating gaps.
pub fn preview(args: RenderArgs) -> Result<(), Error> {
    let engine = build_engine(&args.sources)?;
    let inputs = parse_inputs(&args.inputs)?;
    info!(endpoint = %args.endpoint, "previewing request");
    let value = engine.preview(&args.endpoint, &inputs)?;
    let json = serde_json::to_string_pretty(&value).context(crate::error::SerializeCtx)?;
    println!("{json}");
    Ok(())
}

/// Runs the `match` subcommand: finds the endpoint whose request (and
/// response, if supplied) structurally matches a recorded pair.
pub fn run_match(args: MatchArgs) -> Result<(), Error> {
    let engine = build_engine(&args.sources)?;
    let request_text = read_source(&args.request)?;
    let request: serde_json::Value = serde_json::from_str(&request_text).context(crate::error::SerializeCtx)?;
    let response = args
        .response
        .map(|path| -> Result<serde_json::Value, Error> {
            let text = read_source(&path)?;
            serde_json::from_str(&text).context(crate::error::SerializeCtx)
        })
        .transpose()?;
    let (endpoint, _scope) = engine.match_endpoint(&request, response.as_ref())?;
    println!("matched endpoint: {}", endpoint.configuration.name.as_deref().unwrap_or("<unnamed>"));
    Ok(())
}
