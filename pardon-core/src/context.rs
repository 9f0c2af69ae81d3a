//! The merge/render state machine's ambient state (spec.md §6): the mode a
//! schema operation is running in, the phase it belongs to, and the
//! diagnostics it has accumulated so far.

use crate::error::{Diagnostic, PardonError};
use crate::scope::FrameId;

/// How a schema operation should treat a missing or conflicting value
/// (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Mode {
    /// Combine two schemas, each contributing constraints (`mix`).
    Mix,
    /// Combine two schemas, the second taking precedence on conflict (`mux`).
    Mux,
    /// Compare a schema against a concrete literal (`match`).
    Match,
    /// Combine a schema with an evaluation scope's bound values (`meld`).
    Meld,
    /// Produce a final literal value; unbound required holes are errors.
    Render,
    /// Produce a best-effort literal value; unbound holes fall back to
    /// their source text.
    Preview,
    /// Render ahead of a flow step that hasn't executed yet.
    Prerender,
    /// Render after a flow step's response is available.
    Postrender,
}

impl Mode {
    /// Whether an unbound required hole should be tolerated rather than
    /// raising [`PardonError::Unbound`].
    #[must_use]
    pub fn tolerates_unbound(self) -> bool {
        matches!(self, Mode::Preview | Mode::Mix)
    }
}

/// Which half of the pipeline a schema operation belongs to (spec.md §6):
/// `build` assembles a schema tree from templates, `validate` checks it
/// against bound values or a concrete literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Phase {
    Build,
    Validate,
}

/// Ambient state threaded through a single merge/render/match call tree: the
/// current mode and phase, the evaluation frame in scope, a location stack
/// for diagnostics (`scope:subscope|.field.subfield`), and the soft-failure
/// diagnostics accumulated so far.
#[derive(Debug, Clone)]
pub struct Context {
    pub mode: Mode,
    pub phase: Phase,
    pub frame: FrameId,
    /// Whether `@secret` holes render their bound value or [`crate::pattern::REDACTED`]
    /// (spec.md §4.4, `redact`). Defaults to `true`; callers that want a
    /// redacted render call [`Context::with_secrets`].
    pub reveal_secrets: bool,
    path: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

impl Context {
    #[must_use]
    pub fn new(mode: Mode, phase: Phase, frame: FrameId) -> Self {
        Self {
            mode,
            phase,
            frame,
            reveal_secrets: true,
            path: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Returns a copy of this context with secret holes revealed or
    /// redacted.
    #[must_use]
    pub fn with_secrets(&self, reveal_secrets: bool) -> Self {
        let mut next = self.clone();
        next.reveal_secrets = reveal_secrets;
        next
    }

    /// Returns a copy of this context entered into `field`, for recursing
    /// into a child schema node.
    #[must_use]
    pub fn descend(&self, field: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.path.push(field.into());
        next
    }

    /// Returns a copy of this context with a different mode, used when a
    /// structural node switches its children's mode (e.g. `meld` recursing
    /// as `mux` once a value is bound).
    #[must_use]
    pub fn with_mode(&self, mode: Mode) -> Self {
        let mut next = self.clone();
        next.mode = mode;
        next
    }

    #[must_use]
    pub fn with_frame(&self, frame: FrameId) -> Self {
        let mut next = self.clone();
        next.frame = frame;
        next
    }

    /// The current location, formatted `.field.subfield` (spec.md §7).
    #[must_use]
    pub fn loc(&self) -> String {
        if self.path.is_empty() {
            ".".to_string()
        } else {
            format!(".{}", self.path.join("."))
        }
    }

    /// Records a soft failure rather than aborting the whole operation.
    /// Structural nodes that can recover from a failed child — most
    /// notably `deferred`, trying its next variant — call this instead of
    /// propagating the child's [`PardonError`].
    pub fn fail_soft(&mut self, kind: &'static str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic::new(kind, self.loc(), message));
    }

    pub fn fail_soft_error(&mut self, error: &PardonError) {
        self.diagnostics.push(Diagnostic::new(error.kind(), self.loc(), error.to_string()));
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    #[must_use]
    pub fn has_diagnostics(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    /// Merges diagnostics accumulated in a child context back into this one,
    /// used after a recursive call built its own `Context` via [`Context::descend`].
    pub fn absorb(&mut self, child: Context) {
        self.diagnostics.extend(child.diagnostics);
    }

    /// Raises the first accumulated diagnostic as a hard error, used at the
    /// top of a merge when the result is `undefined` and diagnostics explain
    /// why (spec.md §7).
    pub fn into_result<T>(self, value: Option<T>) -> Result<T, PardonError> {
        match value {
            Some(v) => Ok(v),
            None => {
                let loc = self.loc();
                match self.diagnostics.into_iter().next() {
                    Some(d) => Err(d.into_error()),
                    None => Err(crate::error::InternalCtx {
                        loc,
                        message: "operation produced no value and no diagnostic".to_string(),
                    }
                    .build()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descend_extends_loc() {
        let scope = crate::scope::EvaluationScope::new();
        let ctx = Context::new(Mode::Render, Phase::Build, scope.root());
        let child = ctx.descend("body").descend("id");
        assert_eq!(child.loc(), ".body.id");
    }

    #[test]
    fn preview_tolerates_unbound() {
        assert!(Mode::Preview.tolerates_unbound());
        assert!(!Mode::Render.tolerates_unbound());
    }

    #[test]
    fn into_result_raises_first_diagnostic() {
        let scope = crate::scope::EvaluationScope::new();
        let mut ctx = Context::new(Mode::Render, Phase::Build, scope.root());
        ctx.fail_soft("unbound", "no value for `id`");
        let result: Result<String, _> = ctx.into_result(None);
        assert_eq!(result.unwrap_err().kind(), "unbound");
    }
}
