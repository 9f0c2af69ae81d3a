//! Structural schemas (spec.md §4.3): the sealed sum type every operation
//! in the engine dispatches over, plus the `scope`/`merge`/`render`/`resolve`
//! operation set each variant implements.
//!
//! Schema nodes form an owned, immutable tree — `merge` always returns a new
//! node rather than mutating in place. The only cyclic relationship in the
//! system is between scope frames and the schemas that declared into them,
//! and that cycle lives entirely inside [`crate::scope::EvaluationScope`]'s
//! arena; the schema tree itself never needs one (see `DESIGN.md`).

pub mod encoding;

use std::sync::Arc;

use dyn_clone::DynClone;
use indexmap::IndexMap;

use crate::context::{Context, Mode};
use crate::error::{self, PardonError};
use crate::pattern::{Lookup, Pattern};
use crate::scope::{Binding, ScopeLabel};

pub use encoding::Encoding;

/// A literal scalar type tag (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    String,
    Number,
    Bigint,
    Boolean,
}

/// The rule a [`SchemaNode::Deferred`] evaluates against an incoming
/// template to choose which variant it swaps itself for (spec.md §4.3,
/// "used for polymorphism").
#[derive(Debug, Clone)]
pub enum DeferredRule {
    /// Matches a response status against a 3-digit pattern (`2xx`, `404`).
    StatusRange(String),
    /// Matches unconditionally; used as the final fallback arm.
    Always,
}

impl DeferredRule {
    #[must_use]
    pub fn matches(&self, status: Option<u16>) -> bool {
        match self {
            DeferredRule::Always => true,
            DeferredRule::StatusRange(pattern) => {
                let Some(status) = status else { return false };
                let status = format!("{status:03}");
                pattern.chars().zip(status.chars()).all(|(p, s)| p == 'x' || p == s)
            }
        }
    }
}

/// A variant of [`SchemaNode`] selected by a status/rule, tried in order.
#[derive(Debug, Clone)]
pub struct DeferredArm {
    pub rule: DeferredRule,
    pub schema: Arc<SchemaNode>,
}

/// Extension point for user-defined schema kinds (spec.md §9, "Runtime-typed
/// templates → tagged variants": "a sealed sum type ... plus a `Custom`
/// variant").
pub trait CustomSchema: DynClone + std::fmt::Debug + Send + Sync {
    fn scope(&self, ctx: &Context, scope: &crate::scope::EvaluationScope) -> Result<(), PardonError>;
    fn merge(&self, ctx: &mut Context, other: &SchemaNode) -> Result<Option<SchemaNode>, PardonError>;
    fn render(
        &self,
        ctx: &mut Context,
        scope: &crate::scope::EvaluationScope,
        lookup: Option<&dyn Lookup>,
    ) -> Result<Option<serde_json::Value>, PardonError>;
    fn resolve(&self, ctx: &Context, scope: &crate::scope::EvaluationScope) -> Result<Option<serde_json::Value>, PardonError>;
}

dyn_clone::clone_trait_object!(CustomSchema);

/// A field in an [`SchemaNode::Object`].
#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub schema: Arc<SchemaNode>,
}

/// The schema algebra's sealed sum type (spec.md §3, "Schema node").
#[derive(Debug, Clone, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SchemaNode {
    /// A typed leaf holding a single pattern (spec.md §4.2).
    Scalar { ty: ScalarType, pattern: Pattern },
    /// A literal constant; merge accepts only matching values (spec.md §4.3).
    Value(serde_json::Value),
    /// `object(fields, value?, scoped?)`.
    Object {
        fields: IndexMap<String, Arc<SchemaNode>>,
        archetype: Option<Arc<SchemaNode>>,
        scoped: bool,
    },
    /// `array(element)`.
    Array(Arc<SchemaNode>),
    /// `tuple(elements[])`.
    Tuple(Vec<Arc<SchemaNode>>),
    /// `multivalue(base, archetype)`: a bag of elements keyed by a variable.
    Multivalue {
        base: Arc<SchemaNode>,
        archetype: Arc<SchemaNode>,
    },
    /// `keyed(keyTemplate, body)`, optionally appending values per key (`.mv`).
    Keyed {
        key: Arc<SchemaNode>,
        body: Arc<SchemaNode>,
        multivalued: bool,
    },
    /// `stub(fallback?)`: a placeholder, absorbed by the first merge.
    Stub(Option<serde_json::Value>),
    /// `hidden(template)`: declares variables but renders to nothing.
    Hidden(Arc<SchemaNode>),
    /// `scoped(key, schema)`: re-roots `schema` in a named subscope.
    Scoped { key: String, schema: Arc<SchemaNode> },
    /// `deferred(rule, schema)`: polymorphic dispatch on merge.
    Deferred(Vec<DeferredArm>),
    /// `encoding<inner,outer>`: a reversible textual wrapper.
    Encoded { encoding: Encoding, inner: Arc<SchemaNode> },
    /// Escape hatch for user-defined schema kinds.
    Custom(Arc<dyn CustomSchema>),
}

impl SchemaNode {
    #[must_use]
    pub fn scalar(ty: ScalarType, pattern: Pattern) -> Arc<Self> {
        Arc::new(Self::Scalar { ty, pattern })
    }

    #[must_use]
    pub fn string(pattern: Pattern) -> Arc<Self> {
        Self::scalar(ScalarType::String, pattern)
    }

    /// Declares this node's variables (and any child subscopes) into
    /// `scope`, without binding values (spec.md §2: the `scope` operation).
    pub fn declare(
        &self,
        scope: &crate::scope::EvaluationScope,
        frame: crate::scope::FrameId,
    ) -> Result<(), PardonError> {
        match self {
            SchemaNode::Scalar { pattern, .. } => {
                for hole in pattern.holes() {
                    if let Some(name) = &hole.name {
                        if scope.resolve(frame, name)?.is_none() {
                            scope.bind(frame, name.clone(), Binding::Undefined);
                        }
                    }
                }
                Ok(())
            }
            SchemaNode::Value(_) | SchemaNode::Stub(_) => Ok(()),
            SchemaNode::Object { fields, archetype, scoped } => {
                for (name, field) in fields {
                    let child = if *scoped {
                        scope.subscope(frame, ScopeLabel(format!("field:{name}")))
                    } else {
                        frame
                    };
                    field.declare(scope, child)?;
                }
                if let Some(archetype) = archetype {
                    archetype.declare(scope, frame)?;
                }
                Ok(())
            }
            SchemaNode::Array(element) | SchemaNode::Hidden(element) => element.declare(scope, frame),
            SchemaNode::Tuple(elements) => {
                for element in elements {
                    element.declare(scope, frame)?;
                }
                Ok(())
            }
            SchemaNode::Multivalue { base, archetype } => {
                base.declare(scope, frame)?;
                archetype.declare(scope, frame)
            }
            SchemaNode::Keyed { key, body, .. } => {
                key.declare(scope, frame)?;
                body.declare(scope, frame)
            }
            SchemaNode::Scoped { key, schema } => {
                let child = scope.subscope(frame, ScopeLabel(format!("scoped:{key}")));
                schema.declare(scope, child)
            }
            SchemaNode::Deferred(arms) => {
                for arm in arms {
                    arm.schema.declare(scope, frame)?;
                }
                Ok(())
            }
            SchemaNode::Encoded { inner, .. } => inner.declare(scope, frame),
            SchemaNode::Custom(custom) => {
                let ctx = Context::new(Mode::Mix, crate::context::Phase::Build, frame);
                custom.scope(&ctx, scope)
            }
        }
    }

    /// Folds `other` into `self` under the mode carried by `ctx` (spec.md
    /// §2, the `merge` operation). Returns `Ok(None)` on a soft failure —
    /// the caller records a diagnostic via `ctx`.
    pub fn merge(self: &Arc<Self>, ctx: &mut Context, other: &Arc<SchemaNode>) -> Result<Option<Arc<SchemaNode>>, PardonError> {
        tracing::trace!(
            mode = %ctx.mode,
            left = node_kind(self),
            right = node_kind(other),
            "merging schema nodes"
        );
        if let SchemaNode::Stub(fallback) = self.as_ref() {
            return match (fallback, ctx.mode) {
                (_, Mode::Match) if fallback.is_none() => {
                    ctx.fail_soft("match", "stub has no template to match against");
                    Ok(None)
                }
                _ => Ok(Some(other.clone())),
            };
        }
        match (self.as_ref(), other.as_ref()) {
            (SchemaNode::Scalar { ty, pattern: left }, SchemaNode::Scalar { pattern: right, .. }) => {
                merge_scalar(ctx, *ty, left, right)
            }
            (SchemaNode::Value(left), SchemaNode::Value(right)) => {
                if left == right {
                    Ok(Some(self.clone()))
                } else {
                    ctx.fail_soft("conflict", format!("conflicting literal values {left} vs {right}"));
                    Ok(None)
                }
            }
            (
                SchemaNode::Object { fields: left, archetype: left_arch, scoped },
                SchemaNode::Object { fields: right, archetype: right_arch, .. },
            ) => merge_object(ctx, left, left_arch, right, right_arch, *scoped),
            (SchemaNode::Array(left), SchemaNode::Array(right)) => {
                let mut child_ctx = ctx.descend("[]");
                let merged = left.merge(&mut child_ctx, right)?;
                ctx.absorb(child_ctx);
                Ok(merged.map(|m| Arc::new(SchemaNode::Array(m))))
            }
            (SchemaNode::Tuple(left), SchemaNode::Tuple(right)) => merge_tuple(ctx, left, right),
            (
                SchemaNode::Multivalue { base: left_base, archetype: left_arch },
                SchemaNode::Multivalue { base: right_base, archetype: right_arch },
            ) => {
                let mut base_ctx = ctx.descend("base");
                let base = left_base.merge(&mut base_ctx, right_base)?;
                ctx.absorb(base_ctx);
                let mut arch_ctx = ctx.descend("archetype");
                let archetype = left_arch.merge(&mut arch_ctx, right_arch)?;
                ctx.absorb(arch_ctx);
                Ok(match (base, archetype) {
                    (Some(base), Some(archetype)) => Some(Arc::new(SchemaNode::Multivalue { base, archetype })),
                    _ => None,
                })
            }
            (
                SchemaNode::Keyed { key: left_key, body: left_body, multivalued },
                SchemaNode::Keyed { key: right_key, body: right_body, .. },
            ) => {
                let mut key_ctx = ctx.descend("key");
                let key = left_key.merge(&mut key_ctx, right_key)?;
                ctx.absorb(key_ctx);
                let mut body_ctx = ctx.descend("body");
                let body = if *multivalued {
                    left_body.merge(&mut body_ctx.with_mode(Mode::Mux), right_body)?
                } else {
                    left_body.merge(&mut body_ctx, right_body)?
                };
                ctx.absorb(body_ctx);
                Ok(match (key, body) {
                    (Some(key), Some(body)) => Some(Arc::new(SchemaNode::Keyed { key, body, multivalued: *multivalued })),
                    _ => None,
                })
            }
            (SchemaNode::Hidden(left), _) => {
                let merged = left.merge(ctx, other)?;
                Ok(merged.map(|m| Arc::new(SchemaNode::Hidden(m))))
            }
            (_, SchemaNode::Hidden(right)) => self.merge(ctx, right),
            (SchemaNode::Scoped { key, schema }, _) => {
                // Building a merged schema is structural only; the named
                // subscope this node re-roots into is created lazily by
                // `render`/`match_literal`, which do have an
                // `EvaluationScope` to create it in.
                let mut child_ctx = ctx.descend(format!("@{key}"));
                let merged = schema.merge(&mut child_ctx, other)?;
                ctx.absorb(child_ctx);
                Ok(merged.map(|m| Arc::new(SchemaNode::Scoped { key: key.clone(), schema: m })))
            }
            (SchemaNode::Deferred(arms), _) => merge_deferred(ctx, arms, other),
            (SchemaNode::Encoded { encoding, inner }, _) => {
                let decoded = encoding.decode(other)?;
                let mut child_ctx = ctx.descend("~encoded");
                let merged = inner.merge(&mut child_ctx, &decoded)?;
                ctx.absorb(child_ctx);
                Ok(merged.map(|m| Arc::new(SchemaNode::Encoded { encoding: encoding.clone(), inner: m })))
            }
            (SchemaNode::Custom(custom), _) => Ok(custom.merge(ctx, other)?.map(Arc::new)),
            (_, SchemaNode::Stub(_)) => Ok(Some(self.clone())),
            (left, right) => {
                ctx.fail_soft(
                    "conflict",
                    format!("cannot merge {} with {}", node_kind(left), node_kind(right)),
                );
                Ok(None)
            }
        }
    }

    /// Produces a final value for this node under `ctx`'s mode (spec.md §2,
    /// the `render` operation).
    pub fn render(
        &self,
        ctx: &mut Context,
        scope: &crate::scope::EvaluationScope,
        lookup: Option<&dyn Lookup>,
    ) -> Result<Option<serde_json::Value>, PardonError> {
        match self {
            SchemaNode::Scalar { ty, pattern } => render_scalar(ctx, *ty, pattern, scope, lookup),
            SchemaNode::Value(v) => Ok(Some(v.clone())),
            SchemaNode::Object { fields, scoped, .. } => {
                let mut out = serde_json::Map::new();
                for (name, field) in fields {
                    let frame = if *scoped {
                        scope.subscope(ctx.frame, ScopeLabel(format!("field:{name}")))
                    } else {
                        ctx.frame
                    };
                    let mut child_ctx = ctx.with_frame(frame).descend(name.clone());
                    let value = field.render(&mut child_ctx, scope, lookup)?;
                    ctx.absorb(child_ctx);
                    if let Some(value) = value {
                        if !matches!(field.as_ref(), SchemaNode::Hidden(_)) {
                            out.insert(name.clone(), value);
                        }
                    } else if !ctx.mode.tolerates_unbound() {
                        ctx.fail_soft("unbound", format!("field `{name}` did not render"));
                        return Ok(None);
                    }
                }
                Ok(Some(serde_json::Value::Object(out)))
            }
            SchemaNode::Array(element) => {
                let mut child_ctx = ctx.descend("[]");
                let value = element.render(&mut child_ctx, scope, lookup)?;
                ctx.absorb(child_ctx);
                Ok(value.map(|v| serde_json::Value::Array(vec![v])))
            }
            SchemaNode::Tuple(elements) => {
                let mut out = Vec::with_capacity(elements.len());
                for (index, element) in elements.iter().enumerate() {
                    let mut child_ctx = ctx.descend(format!("[{index}]"));
                    let value = element.render(&mut child_ctx, scope, lookup)?;
                    ctx.absorb(child_ctx);
                    match value {
                        Some(v) => out.push(v),
                        None if ctx.mode.tolerates_unbound() => out.push(serde_json::Value::Null),
                        None => return Ok(None),
                    }
                }
                Ok(Some(serde_json::Value::Array(out)))
            }
            SchemaNode::Multivalue { base, .. } => base.render(ctx, scope, lookup),
            SchemaNode::Keyed { key, body, .. } => render_keyed(ctx, key, body, scope, lookup),
            SchemaNode::Stub(fallback) => Ok(fallback.clone()),
            SchemaNode::Hidden(inner) => {
                inner.render(ctx, scope, lookup)?;
                Ok(Some(serde_json::Value::Null))
            }
            SchemaNode::Scoped { key, schema } => {
                let frame = scope.subscope(ctx.frame, ScopeLabel(format!("scoped:{key}")));
                let mut child_ctx = ctx.with_frame(frame);
                let value = schema.render(&mut child_ctx, scope, lookup)?;
                ctx.absorb(child_ctx);
                Ok(value)
            }
            SchemaNode::Deferred(arms) => {
                for arm in arms {
                    if let Some(value) = arm.schema.render(ctx, scope, lookup)? {
                        return Ok(Some(value));
                    }
                }
                Ok(None)
            }
            SchemaNode::Encoded { encoding, inner } => {
                let Some(value) = inner.render(ctx, scope, lookup)? else {
                    return Ok(None);
                };
                Ok(Some(serde_json::Value::String(encoding.encode(&value)?)))
            }
            SchemaNode::Custom(custom) => custom.render(ctx, scope, lookup),
        }
    }

    /// Returns a value without side effects, used by `match` to compare a
    /// schema against a concrete literal (spec.md §2, the `resolve`
    /// operation).
    pub fn resolve(
        &self,
        ctx: &Context,
        scope: &crate::scope::EvaluationScope,
    ) -> Result<Option<serde_json::Value>, PardonError> {
        match self {
            SchemaNode::Custom(custom) => custom.resolve(ctx, scope),
            other => {
                let mut ctx = ctx.clone();
                other.render(&mut ctx, scope, None)
            }
        }
    }

    /// Matches a concrete literal against this schema, binding captured
    /// values into `scope` (spec.md §4.5, mode `match`).
    pub fn match_literal(
        &self,
        ctx: &mut Context,
        scope: &crate::scope::EvaluationScope,
        literal: &serde_json::Value,
    ) -> Result<bool, PardonError> {
        match self {
            SchemaNode::Scalar { pattern, .. } => {
                let text = scalar_to_text(literal);
                match pattern.match_literal(&text)? {
                    Some(bindings) => {
                        for (name, value) in bindings {
                            scope.bind(ctx.frame, name, Binding::Value(value));
                        }
                        Ok(true)
                    }
                    None => {
                        ctx.fail_soft("match", format!("literal `{text}` does not match pattern `{}`", pattern.source()));
                        Ok(false)
                    }
                }
            }
            SchemaNode::Value(expected) => Ok(expected == literal),
            SchemaNode::Stub(None) => {
                ctx.fail_soft("match", "required");
                Ok(false)
            }
            SchemaNode::Stub(Some(fallback)) => Ok(fallback == literal),
            SchemaNode::Object { fields, scoped, .. } => {
                let serde_json::Value::Object(map) = literal else {
                    return Ok(false);
                };
                for (name, field) in fields {
                    let Some(value) = map.get(name) else {
                        if matches!(field.as_ref(), SchemaNode::Stub(_)) {
                            continue;
                        }
                        ctx.fail_soft("match", format!("missing field `{name}`"));
                        return Ok(false);
                    };
                    let frame = if *scoped {
                        scope.subscope(ctx.frame, ScopeLabel(format!("field:{name}")))
                    } else {
                        ctx.frame
                    };
                    let mut child_ctx = ctx.with_frame(frame).descend(name.clone());
                    let matched = field.match_literal(&mut child_ctx, scope, value)?;
                    ctx.absorb(child_ctx);
                    if !matched {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            SchemaNode::Hidden(inner) => inner.match_literal(ctx, scope, literal),
            SchemaNode::Scoped { key, schema } => {
                let frame = scope.subscope(ctx.frame, ScopeLabel(format!("scoped:{key}")));
                let mut child_ctx = ctx.with_frame(frame);
                let matched = schema.match_literal(&mut child_ctx, scope, literal)?;
                ctx.absorb(child_ctx);
                Ok(matched)
            }
            SchemaNode::Deferred(arms) => {
                let status = literal
                    .get("status")
                    .and_then(serde_json::Value::as_u64)
                    .map(|s| s as u16);
                for arm in arms {
                    if arm.rule.matches(status) && arm.schema.match_literal(ctx, scope, literal)? {
                        return Ok(true);
                    }
                }
                ctx.fail_soft("match", "no deferred variant matched");
                Ok(false)
            }
            SchemaNode::Encoded { encoding, inner } => {
                let serde_json::Value::String(text) = literal else {
                    return Ok(false);
                };
                let decoded = encoding.decode_value(text)?;
                inner.match_literal(ctx, scope, &decoded)
            }
            SchemaNode::Array(element) => match literal {
                serde_json::Value::Array(items) => {
                    for item in items {
                        if !element.match_literal(ctx, scope, item)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                _ => Ok(false),
            },
            SchemaNode::Tuple(elements) => match literal {
                serde_json::Value::Array(items) if items.len() == elements.len() => {
                    for (element, item) in elements.iter().zip(items) {
                        if !element.match_literal(ctx, scope, item)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                _ => Ok(false),
            },
            SchemaNode::Multivalue { base, .. } => base.match_literal(ctx, scope, literal),
            SchemaNode::Keyed { key, body, multivalued } => match_keyed(ctx, key, body, *multivalued, scope, literal),
            SchemaNode::Custom(custom) => {
                let resolved = custom.resolve(ctx, scope)?;
                Ok(resolved.as_ref() == Some(literal))
            }
        }
    }
}

fn node_kind(node: &SchemaNode) -> &str {
    node.as_ref()
}

fn scalar_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Extracts the text a `keyed` list's key schema groups an element by,
/// without touching any scope — grouping happens before we know whether an
/// element's key is new or a repeat, so nothing should be bound yet. Only
/// a `Scalar` key schema can be evaluated this way, matching its pattern's
/// first captured hole; any other key schema shape never groups.
fn keyed_key_text(key: &SchemaNode, element: &serde_json::Value) -> Result<Option<String>, PardonError> {
    let SchemaNode::Scalar { pattern, .. } = key else {
        return Ok(None);
    };
    let text = scalar_to_text(element);
    Ok(pattern.match_literal(&text)?.and_then(|bindings| bindings.into_iter().next()).map(|(_, value)| value))
}

/// Matches a `keyed(key, body)` list literal by grouping its elements
/// under the text `key` extracts from each (spec.md §8: "projects a list
/// into a map by extracting a key variable from each element, then merges
/// by key"). Groups are recorded as nested subscopes — `keyed:<key>` per
/// distinct key, in first-appearance order, and `item:<index>` per element
/// within a group — so `render_keyed` can walk the same structure back out.
/// A non-multivalued list with a repeated key is a conflict; a
/// multivalued one appends every occurrence under its key's group.
fn match_keyed(
    ctx: &mut Context,
    key: &SchemaNode,
    body: &SchemaNode,
    multivalued: bool,
    scope: &crate::scope::EvaluationScope,
    literal: &serde_json::Value,
) -> Result<bool, PardonError> {
    let serde_json::Value::Array(elements) = literal else {
        ctx.fail_soft("match", "keyed list expects a JSON array literal");
        return Ok(false);
    };
    let mut groups: IndexMap<String, Vec<&serde_json::Value>> = IndexMap::new();
    for element in elements {
        let Some(key_text) = keyed_key_text(key, element)? else {
            ctx.fail_soft("match", format!("element `{element}` does not match the keyed list's key pattern"));
            return Ok(false);
        };
        let bucket = groups.entry(key_text.clone()).or_default();
        if !multivalued && !bucket.is_empty() {
            ctx.fail_soft("conflict", format!("duplicate key `{key_text}` in non-multivalued keyed list"));
            return Ok(false);
        }
        bucket.push(element);
    }
    for (key_text, elements) in &groups {
        let key_frame = scope.subscope(ctx.frame, ScopeLabel(format!("keyed:{key_text}")));
        for (index, element) in elements.iter().enumerate() {
            let item_frame = scope.subscope(key_frame, ScopeLabel(format!("item:{index}")));
            let mut child_ctx = ctx.with_frame(item_frame).descend(format!("@{key_text}[{index}]"));
            let matched = key.match_literal(&mut child_ctx, scope, element)? && body.match_literal(&mut child_ctx, scope, element)?;
            ctx.absorb(child_ctx);
            if !matched {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Renders a `keyed(key, body)` node back into a list, the reverse of
/// `match_keyed`: walks the `keyed:<key>`/`item:<index>` subscopes a prior
/// match built, in the same first-appearance order, re-rendering `body`
/// once per grouped element. Falls back to rendering a single element from
/// `key`/`body`'s directly bound values when nothing was ever matched into
/// this node (the common case of building a request from scratch).
fn render_keyed(
    ctx: &mut Context,
    key: &Arc<SchemaNode>,
    body: &Arc<SchemaNode>,
    scope: &crate::scope::EvaluationScope,
    lookup: Option<&dyn Lookup>,
) -> Result<Option<serde_json::Value>, PardonError> {
    let groups = scope.subscopes_with_prefix(ctx.frame, "keyed");
    if groups.is_empty() {
        return Ok(match (key.render(ctx, scope, lookup)?, body.render(ctx, scope, lookup)?) {
            (Some(_), Some(v)) => Some(serde_json::Value::Array(vec![v])),
            _ if ctx.mode.tolerates_unbound() => Some(serde_json::Value::Array(vec![])),
            _ => None,
        });
    }
    let mut out = Vec::new();
    for (_, key_frame) in groups {
        for (_, item_frame) in scope.subscopes_with_prefix(key_frame, "item") {
            let mut child_ctx = ctx.with_frame(item_frame);
            let value = body.render(&mut child_ctx, scope, lookup)?;
            ctx.absorb(child_ctx);
            match value {
                Some(v) => out.push(v),
                None if ctx.mode.tolerates_unbound() => {}
                None => return Ok(None),
            }
        }
    }
    Ok(Some(serde_json::Value::Array(out)))
}

fn merge_scalar(
    ctx: &mut Context,
    ty: ScalarType,
    left: &Pattern,
    right: &Pattern,
) -> Result<Option<Arc<SchemaNode>>, PardonError> {
    if left.is_simple() && right.is_simple() {
        let left_hole = left.holes().next();
        let right_hole = right.holes().next();
        if let (Some(l), Some(r)) = (left_hole, right_hole) {
            if l.name == r.name {
                return Ok(Some(SchemaNode::scalar(ty, left.clone())));
            }
        }
    }
    // Treat a simple hole merged with a literal pattern as the literal
    // implying a value for that hole (spec.md §4.2): the literal side wins.
    if left.is_simple() && left.holes().next().is_some_and(|h| !h.is_anonymous()) {
        return Ok(Some(SchemaNode::scalar(ty, right.clone())));
    }
    if right.is_simple() && right.holes().next().is_some_and(|h| !h.is_anonymous()) {
        return Ok(Some(SchemaNode::scalar(ty, left.clone())));
    }
    if left.source() == right.source() {
        return Ok(Some(SchemaNode::scalar(ty, left.clone())));
    }
    ctx.fail_soft(
        "conflict",
        format!("conflicting scalar patterns `{}` vs `{}`", left.source(), right.source()),
    );
    Ok(None)
}

#[allow(clippy::too_many_arguments)]
fn merge_object(
    ctx: &mut Context,
    left: &IndexMap<String, Arc<SchemaNode>>,
    left_archetype: &Option<Arc<SchemaNode>>,
    right: &IndexMap<String, Arc<SchemaNode>>,
    right_archetype: &Option<Arc<SchemaNode>>,
    scoped: bool,
) -> Result<Option<Arc<SchemaNode>>, PardonError> {
    let mut fields = left.clone();
    for (name, right_field) in right {
        let merged = match fields.get(name) {
            Some(left_field) => {
                let mut child_ctx = ctx.descend(name.clone());
                let result = left_field.merge(&mut child_ctx, right_field)?;
                ctx.absorb(child_ctx);
                match result {
                    Some(m) => m,
                    None => return Ok(None),
                }
            }
            None => match left_archetype {
                Some(archetype) => {
                    let mut child_ctx = ctx.descend(name.clone());
                    let result = archetype.merge(&mut child_ctx, right_field)?;
                    ctx.absorb(child_ctx);
                    match result {
                        Some(m) => m,
                        None => return Ok(None),
                    }
                }
                None => right_field.clone(),
            },
        };
        fields.insert(name.clone(), merged);
    }
    let archetype = match (left_archetype, right_archetype) {
        (Some(l), Some(r)) => {
            let mut child_ctx = ctx.descend("*");
            let merged = l.merge(&mut child_ctx, r)?;
            ctx.absorb(child_ctx);
            merged
        }
        (Some(l), None) => Some(l.clone()),
        (None, Some(r)) => Some(r.clone()),
        (None, None) => None,
    };
    Ok(Some(Arc::new(SchemaNode::Object { fields, archetype, scoped })))
}

fn merge_tuple(
    ctx: &mut Context,
    left: &[Arc<SchemaNode>],
    right: &[Arc<SchemaNode>],
) -> Result<Option<Arc<SchemaNode>>, PardonError> {
    if left.len() != right.len() {
        ctx.fail_soft("conflict", format!("tuple arity mismatch: {} vs {}", left.len(), right.len()));
        return Ok(None);
    }
    let mut out = Vec::with_capacity(left.len());
    for (index, (l, r)) in left.iter().zip(right).enumerate() {
        let mut child_ctx = ctx.descend(format!("[{index}]"));
        let merged = l.merge(&mut child_ctx, r)?;
        ctx.absorb(child_ctx);
        match merged {
            Some(m) => out.push(m),
            None => return Ok(None),
        }
    }
    Ok(Some(Arc::new(SchemaNode::Tuple(out))))
}

fn merge_deferred(
    ctx: &mut Context,
    arms: &[DeferredArm],
    other: &Arc<SchemaNode>,
) -> Result<Option<Arc<SchemaNode>>, PardonError> {
    let mut merged_arms = Vec::with_capacity(arms.len());
    for arm in arms {
        let mut child_ctx = ctx.descend(format!("~{}", rule_label(&arm.rule)));
        let merged = arm.schema.merge(&mut child_ctx, other)?;
        ctx.absorb(child_ctx);
        match merged {
            Some(schema) => merged_arms.push(DeferredArm { rule: arm.rule.clone(), schema }),
            None => merged_arms.push(arm.clone()),
        }
    }
    Ok(Some(Arc::new(SchemaNode::Deferred(merged_arms))))
}

fn rule_label(rule: &DeferredRule) -> String {
    match rule {
        DeferredRule::Always => "*".to_string(),
        DeferredRule::StatusRange(s) => s.clone(),
    }
}

fn render_scalar(
    ctx: &mut Context,
    ty: ScalarType,
    pattern: &Pattern,
    scope: &crate::scope::EvaluationScope,
    lookup: Option<&dyn Lookup>,
) -> Result<Option<serde_json::Value>, PardonError> {
    struct ScopeOnly<'a>(&'a crate::scope::EvaluationScope, crate::scope::FrameId);
    impl Lookup for ScopeOnly<'_> {
        fn lookup(&self, name: &str) -> Option<String> {
            self.0.resolve_path(self.1, name).ok().flatten()
        }
        fn evaluate(&self, _expression: &str) -> Result<Option<String>, PardonError> {
            Err(error::InternalCtx {
                loc: "schema".to_string(),
                message: "expression evaluation requires a ScriptEnvironment".to_string(),
            }
            .build())
        }
    }
    let scope_only = ScopeOnly(scope, ctx.frame);
    let lookup = lookup.unwrap_or(&scope_only);
    let text = if ctx.mode == Mode::Preview {
        Some(pattern.preview(lookup))
    } else {
        pattern.render_with(lookup, ctx.reveal_secrets)?
    };
    let Some(text) = text else {
        if !ctx.mode.tolerates_unbound() {
            let name = pattern.holes().next().and_then(|h| h.name.clone()).unwrap_or_default();
            ctx.fail_soft("unbound", format!("no value for `{name}`"));
        }
        return Ok(None);
    };
    Ok(Some(coerce_scalar(ty, &text)))
}

fn coerce_scalar(ty: ScalarType, text: &str) -> serde_json::Value {
    match ty {
        ScalarType::String => serde_json::Value::String(text.to_string()),
        ScalarType::Boolean => serde_json::Value::Bool(text == "true"),
        ScalarType::Number => serde_json::from_str(text)
            .ok()
            .unwrap_or_else(|| serde_json::Value::String(text.to_string())),
        ScalarType::Bigint => serde_json::Value::String(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Phase;
    use crate::scope::EvaluationScope;

    fn render(node: &Arc<SchemaNode>, scope: &EvaluationScope, mode: Mode) -> Option<serde_json::Value> {
        let mut ctx = Context::new(mode, Phase::Build, scope.root());
        node.render(&mut ctx, scope, None).unwrap()
    }

    #[test]
    fn renders_simple_scalar() {
        let scope = EvaluationScope::new();
        scope.bind(scope.root(), "id", Binding::Value("42".to_string()));
        let node = SchemaNode::string(Pattern::parse("{{id}}").unwrap());
        assert_eq!(render(&node, &scope, Mode::Render), Some(serde_json::json!("42")));
    }

    #[test]
    fn merges_object_fields_union() {
        let mut left_fields = IndexMap::new();
        left_fields.insert("a".to_string(), SchemaNode::string(Pattern::parse("{{a}}").unwrap()));
        let left = Arc::new(SchemaNode::Object {
            fields: left_fields,
            archetype: None,
            scoped: false,
        });
        let mut right_fields = IndexMap::new();
        right_fields.insert("b".to_string(), SchemaNode::string(Pattern::parse("{{b}}").unwrap()));
        let right = Arc::new(SchemaNode::Object {
            fields: right_fields,
            archetype: None,
            scoped: false,
        });
        let scope = EvaluationScope::new();
        let mut ctx = Context::new(Mode::Mix, Phase::Build, scope.root());
        let merged = left.merge(&mut ctx, &right).unwrap().unwrap();
        let SchemaNode::Object { fields, .. } = merged.as_ref() else {
            panic!("expected object");
        };
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn empty_object_merge_adds_no_fields() {
        let left = Arc::new(SchemaNode::Object {
            fields: IndexMap::new(),
            archetype: None,
            scoped: false,
        });
        let mut right_fields = IndexMap::new();
        right_fields.insert("a".to_string(), SchemaNode::string(Pattern::parse("{{a}}").unwrap()));
        let right = Arc::new(SchemaNode::Object {
            fields: right_fields,
            archetype: None,
            scoped: false,
        });
        let scope = EvaluationScope::new();
        let mut ctx = Context::new(Mode::Mix, Phase::Build, scope.root());
        let merged = right.merge(&mut ctx, &left).unwrap().unwrap();
        let SchemaNode::Object { fields, .. } = merged.as_ref() else {
            panic!("expected object");
        };
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn stub_without_fallback_fails_match() {
        let node = Arc::new(SchemaNode::Stub(None));
        let scope = EvaluationScope::new();
        let mut ctx = Context::new(Mode::Match, Phase::Validate, scope.root());
        let matched = node.match_literal(&mut ctx, &scope, &serde_json::json!(null)).unwrap();
        assert!(!matched);
        assert_eq!(ctx.diagnostics()[0].kind, "match");
    }

    #[test]
    fn deferred_picks_matching_status_arm() {
        fn object_with(name: &str, value: &str) -> Arc<SchemaNode> {
            let mut fields = IndexMap::new();
            fields.insert(name.to_string(), SchemaNode::string(Pattern::parse(value).unwrap()));
            Arc::new(SchemaNode::Object { fields, archetype: None, scoped: false })
        }
        let ok_arm = DeferredArm {
            rule: DeferredRule::StatusRange("2xx".to_string()),
            schema: object_with("id", "{{id}}"),
        };
        let err_arm = DeferredArm {
            rule: DeferredRule::StatusRange("4xx".to_string()),
            schema: object_with("error", "{{msg}}"),
        };
        let node = Arc::new(SchemaNode::Deferred(vec![ok_arm, err_arm]));
        let scope = EvaluationScope::new();
        let mut ctx = Context::new(Mode::Match, Phase::Validate, scope.root());
        let literal = serde_json::json!({"status": 404, "error": "missing"});
        assert!(node.match_literal(&mut ctx, &scope, &literal).unwrap());
        assert_eq!(scope.resolve(scope.root(), "msg").unwrap().as_deref(), Some("missing"));
        assert_eq!(scope.resolve(scope.root(), "id").unwrap(), None);
    }

    fn keyed_pair_node(multivalued: bool) -> Arc<SchemaNode> {
        let pattern = || Pattern::parse("{{key}}={{value}}").unwrap();
        Arc::new(SchemaNode::Keyed {
            key: SchemaNode::string(pattern()),
            body: SchemaNode::string(pattern()),
            multivalued,
        })
    }

    #[test]
    fn keyed_mv_appends_values_for_a_repeated_key_and_sorts_by_first_appearance() {
        let node = keyed_pair_node(true);
        let scope = EvaluationScope::new();
        let mut ctx = Context::new(Mode::Match, Phase::Validate, scope.root());
        let literal = serde_json::json!(["b=1", "a=1", "a=2", "b=2"]);
        assert!(node.match_literal(&mut ctx, &scope, &literal).unwrap());

        let groups = scope.subscopes_with_prefix(scope.root(), "keyed");
        let keys: Vec<&str> = groups.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["b", "a"], "groups appear in first-encounter order, not sorted");

        let rendered = render(&node, &scope, Mode::Render).unwrap();
        assert_eq!(rendered, serde_json::json!(["b=1", "b=2", "a=1", "a=2"]));
    }

    #[test]
    fn keyed_without_mv_rejects_a_repeated_key() {
        let node = keyed_pair_node(false);
        let scope = EvaluationScope::new();
        let mut ctx = Context::new(Mode::Match, Phase::Validate, scope.root());
        let literal = serde_json::json!(["a=1", "a=2"]);
        assert!(!node.match_literal(&mut ctx, &scope, &literal).unwrap());
        assert_eq!(ctx.diagnostics()[0].kind, "conflict");
    }
}
