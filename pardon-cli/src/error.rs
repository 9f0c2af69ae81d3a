//! Top-level CLI error, wrapping engine and I/O failures for a single
//! `Display`-friendly exit path.

use std::path::PathBuf;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(Ctx)))]
pub enum Error {
    #[snafu(display("failed to read `{}`: {source}", path.display()))]
    Read { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to parse `--input {pair}`: expected `name=value`"))]
    InputPair { pair: String },

    #[snafu(transparent)]
    Engine { source: pardon::PardonEngineError },

    #[snafu(display("failed to serialize output: {source}"))]
    Serialize { source: serde_json::Error },
}
