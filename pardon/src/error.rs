//! Errors specific to engine-level orchestration (building, rendering and
//! processing endpoints). Wraps [`PardonError`] transparently, the same way
//! `pardon-https`'s `HttpsError` does, so callers only ever match one type.

use pardon_core::PardonError;
use pardon_https::HttpsError;
use snafu::{Backtrace, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(Ctx)))]
pub enum PardonEngineError {
    /// Propagated from the schema/pattern layer.
    #[snafu(transparent)]
    Schema { source: PardonError },

    /// Propagated from `.https` file parsing.
    #[snafu(transparent)]
    Https { source: HttpsError },

    /// No endpoint matched the given request during `Engine::match`.
    #[snafu(display("no endpoint matched: {reason}"))]
    NoMatch { reason: String, backtrace: Backtrace },

    /// The external `Fetch` collaborator failed.
    #[snafu(display("fetch failed: {message}"))]
    Fetch { message: String, backtrace: Backtrace },
}
