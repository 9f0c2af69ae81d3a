//! Evaluation scope (spec.md §5): a tree of frames holding bound values,
//! subscopes, imports and defaults, resolved lazily and cached per render.
//!
//! Frames are kept in a [`slotmap`] arena and referenced by [`FrameId`]
//! rather than owned directly, the same way `grill-core` keeps schema nodes
//! in an arena keyed by an integer id to avoid a parent/child ownership
//! cycle.

use std::cell::RefCell;
use std::collections::HashMap;

use indexmap::IndexMap;
use slotmap::{new_key_type, SlotMap};

use crate::error::{self, PardonError};
use crate::pattern::Lookup;

new_key_type! {
    /// Identifies a single frame within an [`EvaluationScope`]'s arena.
    pub struct FrameId;
}

/// A value bound in a frame: either a literal string or an unevaluated
/// expression source, evaluated lazily on first lookup.
#[derive(Debug, Clone)]
pub enum Binding {
    Value(String),
    Expression(String),
    /// An explicit absence — distinct from "not present" (spec.md §5: a
    /// default chain stops here rather than falling through).
    Undefined,
}

/// One named level of nesting inside a scope (`"query"`, `"headers"`, a
/// flow step name, …). Labels with the same class prefix (before the
/// first `:`) are treated as belonging to the same defaults chain; see
/// `DESIGN.md` for why this, rather than full structural equality, was
/// chosen to resolve the "when are two scopes disjoint" open question.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeLabel(pub String);

impl ScopeLabel {
    #[must_use]
    pub fn class(&self) -> &str {
        self.0.split(':').next().unwrap_or(&self.0)
    }
}

#[derive(Debug, Default)]
struct Frame {
    values: HashMap<String, Binding>,
    /// An `IndexMap` so subscopes can be walked back out in the order they
    /// were first created — `Keyed`'s grouping relies on this to honor
    /// "keys sort by first appearance" (spec.md §8).
    subscopes: IndexMap<ScopeLabel, FrameId>,
    imported: HashMap<String, FrameId>,
    parent: Option<FrameId>,
    /// Cache of already-evaluated expression results, so a diamond of
    /// references to the same identifier evaluates its expression once.
    resolved: HashMap<String, String>,
}

/// A hierarchy of [`Frame`]s implementing defaults-chain resolution: a
/// lookup walks from the current frame up through `parent` links, and
/// within a frame first checks `values`, then `imported` frames, before
/// continuing upward.
pub struct EvaluationScope {
    arena: RefCell<SlotMap<FrameId, Frame>>,
    root: FrameId,
    /// `(frame, identifier)` pairs currently being resolved, used to detect
    /// cycles (spec.md §5, "Cycle").
    in_flight: RefCell<Vec<(FrameId, String)>>,
}

impl EvaluationScope {
    #[must_use]
    pub fn new() -> Self {
        let mut arena = SlotMap::with_key();
        let root = arena.insert(Frame::default());
        Self {
            arena: RefCell::new(arena),
            root,
            in_flight: RefCell::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn root(&self) -> FrameId {
        self.root
    }

    /// Creates a new frame as a child of `parent`, reachable under `label`.
    pub fn subscope(&self, parent: FrameId, label: ScopeLabel) -> FrameId {
        let mut arena = self.arena.borrow_mut();
        if let Some(existing) = arena[parent].subscopes.get(&label) {
            return *existing;
        }
        let frame = Frame {
            parent: Some(parent),
            ..Frame::default()
        };
        let id = arena.insert(frame);
        arena[parent].subscopes.insert(label, id);
        id
    }

    /// Returns `frame`'s direct subscopes whose label starts with
    /// `prefix:`, in the order they were first created, paired with the
    /// remainder of their label after the prefix. Used by `Keyed` to
    /// enumerate the per-key groups a prior `match_literal` built.
    pub fn subscopes_with_prefix(&self, frame: FrameId, prefix: &str) -> Vec<(String, FrameId)> {
        let needle = format!("{prefix}:");
        self.arena.borrow()[frame]
            .subscopes
            .iter()
            .filter_map(|(label, id)| label.0.strip_prefix(&needle).map(|rest| (rest.to_string(), *id)))
            .collect()
    }

    /// Binds `name` to a value or expression directly in `frame`.
    pub fn bind(&self, frame: FrameId, name: impl Into<String>, binding: Binding) {
        self.arena.borrow_mut()[frame].values.insert(name.into(), binding);
    }

    /// Imports another frame's bindings as a fallback layer searched after
    /// `frame`'s own `values` but before its parent (spec.md §5, "imported").
    pub fn import(&self, frame: FrameId, name: impl Into<String>, source: FrameId) {
        self.arena.borrow_mut()[frame].imported.insert(name.into(), source);
    }

    /// Resolves `name` starting at `frame`, walking the defaults chain:
    /// own values, then imported frames (each searched the same way,
    /// recursively), then the parent frame.
    ///
    /// # Errors
    /// Returns [`PardonError::Cycle`] if resolving `name` at some frame
    /// requires resolving the same `(frame, name)` pair again further up
    /// the chain — an imported or parent frame looping back to one already
    /// being resolved.
    pub fn resolve(&self, frame: FrameId, name: &str) -> Result<Option<String>, PardonError> {
        self.resolve_guarded(frame, name)
    }

    fn resolve_guarded(&self, frame: FrameId, name: &str) -> Result<Option<String>, PardonError> {
        let key = (frame, name.to_string());
        if self.in_flight.borrow().contains(&key) {
            let path = self
                .in_flight
                .borrow()
                .iter()
                .map(|(_, n)| n.as_str())
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(error::CycleCtx {
                path: path + " -> " + name,
            }
            .build());
        }
        self.in_flight.borrow_mut().push(key.clone());
        let result = self.resolve_inner(frame, name);
        self.in_flight.borrow_mut().retain(|k| *k != key);
        result
    }

    fn resolve_inner(&self, frame: FrameId, name: &str) -> Result<Option<String>, PardonError> {
        if let Some(cached) = self.arena.borrow()[frame].resolved.get(name) {
            return Ok(Some(cached.clone()));
        }
        let binding = self.arena.borrow()[frame].values.get(name).cloned();
        match binding {
            Some(Binding::Value(v)) => return Ok(Some(v)),
            Some(Binding::Undefined) => return Ok(None),
            Some(Binding::Expression(e)) => {
                // Expressions are resolved by the caller (pardon crate),
                // which owns the `ScriptEnvironment`; this layer only
                // tracks that a binding exists so the defaults chain
                // stops here rather than falling through to the parent.
                return Ok(Some(e));
            }
            None => {}
        }
        let imported: Vec<FrameId> = self.arena.borrow()[frame].imported.values().copied().collect();
        for source in imported {
            if let Some(v) = self.resolve_guarded(source, name)? {
                return Ok(Some(v));
            }
        }
        let parent = self.arena.borrow()[frame].parent;
        if let Some(parent) = parent {
            return self.resolve_guarded(parent, name);
        }
        Ok(None)
    }

    /// Caches an already-evaluated expression result so repeated lookups
    /// (e.g. from several holes referencing the same computed field) don't
    /// re-run the evaluator.
    pub fn cache(&self, frame: FrameId, name: impl Into<String>, value: impl Into<String>) {
        self.arena.borrow_mut()[frame].resolved.insert(name.into(), value.into());
    }

    /// Resolves a dotted path (`a.b.c`) by resolving its head identifier and
    /// then indexing into the result as JSON, mirroring how patterns name
    /// nested fields (spec.md §4.1).
    pub fn resolve_path(&self, frame: FrameId, path: &str) -> Result<Option<String>, PardonError> {
        let mut parts = path.splitn(2, '.');
        let head = parts.next().unwrap_or(path);
        let Some(value) = self.resolve(frame, head)? else {
            return Ok(None);
        };
        let Some(rest) = parts.next() else {
            return Ok(Some(value));
        };
        let Ok(mut json) = serde_json::from_str::<serde_json::Value>(&value) else {
            return Ok(None);
        };
        for segment in rest.split('.') {
            json = match json.get(segment) {
                Some(v) => v.clone(),
                None => return Ok(None),
            };
        }
        Ok(match json {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        })
    }
}

impl Default for EvaluationScope {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapts an [`EvaluationScope`] frame to the [`Lookup`] trait consumed by
/// [`crate::pattern::Pattern::render`]. Expression holes are rejected here
/// (`evaluate` always errors); the `pardon` crate's own adapter, which owns
/// a `ScriptEnvironment`, is used whenever a pattern may contain `= expr`
/// holes.
pub struct ScopeLookup<'a> {
    pub scope: &'a EvaluationScope,
    pub frame: FrameId,
}

impl Lookup for ScopeLookup<'_> {
    fn lookup(&self, name: &str) -> Option<String> {
        self.scope.resolve_path(self.frame, name).ok().flatten()
    }

    fn evaluate(&self, _expression: &str) -> Result<Option<String>, PardonError> {
        Err(error::InternalCtx {
            loc: "scope".to_string(),
            message: "expression evaluation requires a ScriptEnvironment".to_string(),
        }
        .build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_own_value() {
        let scope = EvaluationScope::new();
        let root = scope.root();
        scope.bind(root, "id", Binding::Value("42".to_string()));
        assert_eq!(scope.resolve(root, "id").unwrap().as_deref(), Some("42"));
    }

    #[test]
    fn falls_through_to_parent() {
        let scope = EvaluationScope::new();
        let root = scope.root();
        scope.bind(root, "id", Binding::Value("42".to_string()));
        let child = scope.subscope(root, ScopeLabel("query".to_string()));
        assert_eq!(scope.resolve(child, "id").unwrap().as_deref(), Some("42"));
    }

    #[test]
    fn child_shadows_parent() {
        let scope = EvaluationScope::new();
        let root = scope.root();
        scope.bind(root, "id", Binding::Value("42".to_string()));
        let child = scope.subscope(root, ScopeLabel("query".to_string()));
        scope.bind(child, "id", Binding::Value("7".to_string()));
        assert_eq!(scope.resolve(child, "id").unwrap().as_deref(), Some("7"));
    }

    #[test]
    fn undefined_binding_stops_chain() {
        let scope = EvaluationScope::new();
        let root = scope.root();
        scope.bind(root, "id", Binding::Value("42".to_string()));
        let child = scope.subscope(root, ScopeLabel("query".to_string()));
        scope.bind(child, "id", Binding::Undefined);
        assert_eq!(scope.resolve(child, "id").unwrap(), None);
    }

    #[test]
    fn imported_frame_is_searched_before_parent() {
        let scope = EvaluationScope::new();
        let root = scope.root();
        scope.bind(root, "id", Binding::Value("parent".to_string()));
        let donor = scope.subscope(root, ScopeLabel("defaults".to_string()));
        scope.bind(donor, "id", Binding::Value("donor".to_string()));
        let child = scope.subscope(root, ScopeLabel("query".to_string()));
        scope.import(child, "defaults", donor);
        assert_eq!(scope.resolve(child, "id").unwrap().as_deref(), Some("donor"));
    }

    #[test]
    fn mutual_import_cycle_is_reported_not_looped() {
        let scope = EvaluationScope::new();
        let root = scope.root();
        let a = scope.subscope(root, ScopeLabel("scoped:a".to_string()));
        let b = scope.subscope(root, ScopeLabel("scoped:b".to_string()));
        scope.import(a, "b", b);
        scope.import(b, "a", a);
        let err = scope.resolve(a, "x").unwrap_err();
        assert_eq!(err.kind(), "cycle");
    }

    #[test]
    fn resolves_dotted_path_into_json_value() {
        let scope = EvaluationScope::new();
        let root = scope.root();
        scope.bind(root, "user", Binding::Value(r#"{"name":"ada"}"#.to_string()));
        assert_eq!(scope.resolve_path(root, "user.name").unwrap().as_deref(), Some("ada"));
    }

    #[test]
    fn scope_label_class_splits_on_colon() {
        let label = ScopeLabel("flow:login".to_string());
        assert_eq!(label.class(), "flow");
    }
}
