//! Expression lowering and the script-host boundary (spec.md §4.4).
//!
//! The engine never parses or executes the expression language itself —
//! that's the expression host's job. What lives here is the lowering step
//! that turns `name.toLowerCase()`-style source into a list of free
//! identifiers, plus the [`ScriptEnvironment`] trait the host implements.

use std::collections::BTreeSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use pardon_core::PardonError;

/// An expression lowered from its source: its free identifiers (in order of
/// first appearance, spec.md §5 "Ordering") and the original source text to
/// hand to the script host.
#[derive(Debug, Clone)]
pub struct Expression {
    pub source: String,
    pub free_identifiers: Vec<String>,
}

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z_$][A-Za-z0-9_$]*").unwrap());

/// Keywords and property names that never count as free identifiers; a
/// conservative approximation of "parse free identifiers" without a real
/// parser (spec.md §4.4 step 2).
const RESERVED: &[&str] = &[
    "true", "false", "null", "undefined", "typeof", "await", "new", "this", "function", "return", "if", "else",
    "let", "const", "var",
];

impl Expression {
    /// Lowers a raw expression source string: scans for identifier-shaped
    /// tokens, drops reserved words, drops names immediately preceded by a
    /// `.` (property accesses), and de-duplicates while preserving first
    /// appearance order.
    ///
    /// `x.await` is rewritten to `(await x)` before scanning, per spec.md
    /// §4.4 step 4, so that a bare property chain still reads as a pipeline.
    #[must_use]
    pub fn lower(source: &str) -> Self {
        let rewritten = rewrite_await(source);
        let mut seen = BTreeSet::new();
        let mut free = Vec::new();
        let bytes = rewritten.as_bytes();
        for m in IDENTIFIER.find_iter(&rewritten) {
            let preceded_by_dot = m.start() > 0 && bytes[m.start() - 1] == b'.';
            let name = m.as_str();
            if preceded_by_dot || RESERVED.contains(&name) {
                continue;
            }
            if seen.insert(name.to_string()) {
                free.push(name.to_string());
            }
        }
        Self {
            source: rewritten,
            free_identifiers: free,
        }
    }
}

fn rewrite_await(source: &str) -> String {
    static AWAIT_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"([A-Za-z_$][A-Za-z0-9_$.]*)\.await\b").unwrap());
    AWAIT_SUFFIX.replace_all(source, "(await $1)").into_owned()
}

/// The collaborator interface the spec excludes from this engine's scope
/// (spec.md §1): compiling and running a user expression. Implementations
/// own the actual scripting language; the engine only supplies identifier
/// values resolved through [`crate::scope::EvaluationScope`].
pub trait ScriptEnvironment: Send + Sync {
    /// Evaluates `expression`'s lowered form given the resolved value of
    /// each of its free identifiers, in the same order, returning the
    /// result as a string (or `None` for an explicit absence).
    fn evaluate(&self, expression: &Expression, values: &[Option<String>]) -> Result<Option<String>, PardonError>;

    /// Resolves `secrets.NAME`-style expressions, per spec.md §9's
    /// "small capability object" design note. Returns `None` if `name` is
    /// not a known secret.
    fn secret(&self, name: &str) -> Option<String> {
        let _ = name;
        None
    }
}

/// A [`ScriptEnvironment`] that always reports every free identifier
/// unbound, used when a template's expressions are deliberately not wired
/// up to a real host (e.g. unit tests that only exercise structural merge).
#[derive(Debug, Default)]
pub struct NullScriptEnvironment;

impl ScriptEnvironment for NullScriptEnvironment {
    fn evaluate(&self, expression: &Expression, _values: &[Option<String>]) -> Result<Option<String>, PardonError> {
        Err(pardon_core::error::EvaluationCtx {
            loc: "expression".to_string(),
            expression: expression.source.clone(),
            message: "no script environment configured".to_string(),
        }
        .build())
    }
}

type ValueTransform = Arc<dyn Fn(&[Option<String>]) -> Option<String> + Send + Sync>;

/// A [`ScriptEnvironment`] test double backed by a fixed table of
/// identifier → evaluation result, matching identifiers by name rather than
/// evaluating real script source. Used by integration tests and by
/// `pardon-cli` until a real host is wired in.
#[derive(Default, Clone)]
pub struct MapScriptEnvironment {
    functions: std::collections::HashMap<String, ValueTransform>,
}

impl std::fmt::Debug for MapScriptEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapScriptEnvironment")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl MapScriptEnvironment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a simple value-transform recognised by source text match
    /// (e.g. `"name.toLowerCase()"`), used to approximate common expression
    /// idioms without a real script host.
    pub fn register(&mut self, source: impl Into<String>, f: impl Fn(&[Option<String>]) -> Option<String> + Send + Sync + 'static) {
        self.functions.insert(source.into(), Arc::new(f));
    }
}

impl ScriptEnvironment for MapScriptEnvironment {
    fn evaluate(&self, expression: &Expression, values: &[Option<String>]) -> Result<Option<String>, PardonError> {
        if let Some(f) = self.functions.get(&expression.source) {
            return Ok(f(values));
        }
        if let Some(stripped) = expression.source.strip_suffix(".toLowerCase()") {
            if expression.free_identifiers.iter().any(|id| id == stripped) {
                return Ok(values.first().cloned().flatten().map(|v| v.to_lowercase()));
            }
        }
        if let Some(stripped) = expression.source.strip_suffix(".toUpperCase()") {
            if expression.free_identifiers.iter().any(|id| id == stripped) {
                return Ok(values.first().cloned().flatten().map(|v| v.to_uppercase()));
            }
        }
        Err(pardon_core::error::EvaluationCtx {
            loc: "expression".to_string(),
            expression: expression.source.clone(),
            message: "no registered evaluator for expression".to_string(),
        }
        .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowers_free_identifiers_in_order() {
        let expr = Expression::lower("b + a.toLowerCase()");
        assert_eq!(expr.free_identifiers, vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn drops_property_access_names() {
        let expr = Expression::lower("user.name");
        assert_eq!(expr.free_identifiers, vec!["user".to_string()]);
    }

    #[test]
    fn drops_reserved_words() {
        let expr = Expression::lower("typeof x === undefined");
        assert_eq!(expr.free_identifiers, vec!["x".to_string()]);
    }

    #[test]
    fn rewrites_await_suffix() {
        let expr = Expression::lower("value.await");
        assert_eq!(expr.source, "(await value)");
    }

    #[test]
    fn map_environment_lowercases_registered_identifier() {
        let env = MapScriptEnvironment::new();
        let expr = Expression::lower("name.toLowerCase()");
        let result = env.evaluate(&expr, &[Some("Acme".to_string())]).unwrap();
        assert_eq!(result.as_deref(), Some("acme"));
    }
}
