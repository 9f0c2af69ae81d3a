//! Error taxonomy shared by every operation in the schema algebra.
//!
//! Every fallible operation in `pardon-core` returns a [`PardonError`]. The
//! eight `kind`s mirror spec.md §7 exactly: a tagged error with a `kind` and
//! an optional `cause`, plus a `loc` describing where in the scope/field
//! tree the failure occurred.

use std::fmt;

use snafu::{Backtrace, Snafu};

/*
░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░
╔═══════════════════════════════════════════════════════════════════════╗
║                                                                       ║
║                              PardonError                              ║
║                              ¯¯¯¯¯¯¯¯¯¯¯                               ║
╚═══════════════════════════════════════════════════════════════════════╝
░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░░
*/

/// A hard failure raised by a schema operation.
///
/// `parse`, `match`, `conflict`, `unbound`, `evaluation`, `cycle`,
/// `cancelled` and `internal` are the eight kinds named in spec.md §7.
/// Structural nodes that can recover from a failed child (e.g. a
/// [`deferred`](crate::schema::DeferredSchema) trying its next variant)
/// should prefer [`Diagnostic`] accumulation over propagating this error;
/// see [`Context::fail_soft`](crate::context::Context::fail_soft).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(Ctx)))]
pub enum PardonError {
    /// Pattern, HTTPS, or expression grammar violation.
    #[snafu(display("parse error at {loc}: {message}"))]
    Parse {
        loc: String,
        message: String,
        backtrace: Backtrace,
    },

    /// Literal mismatch or required capture absent while matching.
    #[snafu(display("match error at {loc}: {message}"))]
    Match {
        loc: String,
        message: String,
        backtrace: Backtrace,
    },

    /// Two merges imply incompatible values for the same variable.
    #[snafu(display("conflict at {loc}: {message}"))]
    Conflict {
        loc: String,
        message: String,
        backtrace: Backtrace,
    },

    /// A render needed a variable with no value, no default, and no
    /// evaluator.
    #[snafu(display("unbound variable `{name}` at {loc}"))]
    Unbound {
        loc: String,
        name: String,
        backtrace: Backtrace,
    },

    /// A user expression threw while evaluating.
    #[snafu(display("evaluation error at {loc} (`{expression}`): {message}"))]
    Evaluation {
        loc: String,
        expression: String,
        message: String,
        backtrace: Backtrace,
    },

    /// Identifier resolution revisited itself.
    #[snafu(display("cyclic dependency: {path}"))]
    Cycle { path: String, backtrace: Backtrace },

    /// A flow context was aborted mid-evaluation.
    #[snafu(display("cancelled: {reason}"))]
    Cancelled {
        reason: String,
        backtrace: Backtrace,
    },

    /// An invariant was violated; this indicates a bug in the engine itself.
    #[snafu(display("internal error at {loc}: {message}"))]
    Internal {
        loc: String,
        message: String,
        backtrace: Backtrace,
    },
}

impl PardonError {
    /// Returns the error's `kind`, formatted the way spec.md §7 names them.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::Match { .. } => "match",
            Self::Conflict { .. } => "conflict",
            Self::Unbound { .. } => "unbound",
            Self::Evaluation { .. } => "evaluation",
            Self::Cycle { .. } => "cycle",
            Self::Cancelled { .. } => "cancelled",
            Self::Internal { .. } => "internal",
        }
    }
}

/// A soft-failure record accumulated on a [`Context`](crate::context::Context)
/// during merge/render. `loc` is formatted `scope:subscope|.field.subfield`
/// per spec.md §7.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub loc: String,
    pub message: String,
    pub kind: &'static str,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.kind, self.loc, self.message)
    }
}

impl Diagnostic {
    #[must_use]
    pub fn new(kind: &'static str, loc: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            loc: loc.into(),
            message: message.into(),
            kind,
        }
    }

    /// Raises this diagnostic as a hard [`PardonError`] of the matching kind.
    /// Used at the top of a merge when the resulting schema is `undefined`
    /// and diagnostics are non-empty (spec.md §7).
    #[must_use]
    pub fn into_error(self) -> PardonError {
        match self.kind {
            "parse" => ParseCtx {
                loc: self.loc,
                message: self.message,
            }
            .build(),
            "match" => MatchCtx {
                loc: self.loc,
                message: self.message,
            }
            .build(),
            "conflict" => ConflictCtx {
                loc: self.loc,
                message: self.message,
            }
            .build(),
            "unbound" => UnboundCtx {
                loc: self.loc,
                name: self.message,
            }
            .build(),
            "evaluation" => EvaluationCtx {
                loc: self.loc,
                expression: String::new(),
                message: self.message,
            }
            .build(),
            "cycle" => CycleCtx { path: self.message }.build(),
            "cancelled" => CancelledCtx { reason: self.message }.build(),
            _ => InternalCtx {
                loc: self.loc,
                message: self.message,
            }
            .build(),
        }
    }
}
