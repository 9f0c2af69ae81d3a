//! Errors specific to parsing the `.https` file format. Wraps
//! [`pardon_core::PardonError`] transparently so callers outside this crate
//! only ever need to match on one error type.

use pardon_core::PardonError;
use snafu::{Backtrace, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(Ctx)))]
pub enum HttpsError {
    /// Malformed YAML configuration header.
    #[snafu(display("invalid configuration: {message}"))]
    Config { message: String, backtrace: Backtrace },

    /// A step marker (`>>>`/`<<<`) was expected but not found, or the
    /// request/response line inside one didn't parse.
    #[snafu(display("invalid step at line {line}: {message}"))]
    Step {
        line: usize,
        message: String,
        backtrace: Backtrace,
    },

    /// Propagated from the schema/pattern layer while building a node for
    /// a URL, header, or body.
    #[snafu(transparent)]
    Schema { source: PardonError },
}

impl From<HttpsError> for PardonError {
    fn from(value: HttpsError) -> Self {
        match value {
            HttpsError::Schema { source } => source,
            HttpsError::Config { message, .. } => pardon_core::error::ParseCtx {
                loc: "config".to_string(),
                message,
            }
            .build(),
            HttpsError::Step { line, message, .. } => pardon_core::error::ParseCtx {
                loc: format!("line {line}"),
                message,
            }
            .build(),
        }
    }
}
