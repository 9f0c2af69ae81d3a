//! Universal invariants and boundary behaviors for the schema algebra,
//! exercised directly against `SchemaNode`/`EvaluationScope` rather than
//! through an endpoint.

use std::sync::Arc;

use pardon_core::scope::{Binding, EvaluationScope, ScopeLabel};
use pardon_core::{Context, Mode, Pattern, Phase, SchemaNode};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn object_schema(name: &str) -> Arc<SchemaNode> {
    let mut fields = indexmap::IndexMap::new();
    fields.insert(
        name.to_string(),
        SchemaNode::scalar(pardon_core::ScalarType::String, Pattern::parse(&format!("{{{{{name}}}}}")).unwrap()),
    );
    Arc::new(SchemaNode::Object { fields, archetype: None, scoped: false })
}

fn render_one(schema: &Arc<SchemaNode>, name: &str, value: &str) -> serde_json::Value {
    let scope = EvaluationScope::new();
    scope.bind(scope.root(), name, Binding::Value(value.to_string()));
    let mut ctx = Context::new(Mode::Render, Phase::Build, scope.root());
    schema.render(&mut ctx, &scope, None).unwrap().unwrap()
}

proptest! {
    /// Invariant 1: *Round-trip.* For every schema `S` and bound values `V`
    /// such that `render(S, V) = R`, `match(S, R)` yields bindings `V'`
    /// agreeing with `V` on every variable `S` declares.
    #[test]
    fn round_trip_render_then_match_recovers_bindings(id in "[a-zA-Z0-9]{1,12}") {
        let schema = object_schema("id");
        let rendered = render_one(&schema, "id", &id);

        let scope = EvaluationScope::new();
        let mut ctx = Context::new(Mode::Match, Phase::Validate, scope.root());
        let matched = schema.match_literal(&mut ctx, &scope, &rendered).unwrap();
        prop_assert!(matched);
        let resolved = scope.resolve(scope.root(), "id").unwrap();
        prop_assert_eq!(resolved.as_deref(), Some(id.as_str()));
    }

    /// Invariant 5: *Deterministic resolution.* Two renders with identical
    /// inputs and identical default chains produce identical output.
    #[test]
    fn deterministic_resolution_same_inputs_same_output(id in "[a-zA-Z0-9]{1,12}") {
        let schema = object_schema("id");
        let first = render_one(&schema, "id", &id);
        let second = render_one(&schema, "id", &id);
        prop_assert_eq!(first, second);
    }

    /// Invariant 3: *Order independence for mix.* Merging independent
    /// templates in either order yields schemas that render identical
    /// output given identical inputs.
    #[test]
    fn mix_order_independence(id in "[a-zA-Z0-9]{1,8}", name in "[a-zA-Z0-9]{1,8}") {
        let id_only = object_schema("id");
        let mut name_fields = indexmap::IndexMap::new();
        name_fields.insert(
            "name".to_string(),
            SchemaNode::scalar(pardon_core::ScalarType::String, Pattern::parse("{{name}}").unwrap()),
        );
        let name_only = Arc::new(SchemaNode::Object { fields: name_fields, archetype: None, scoped: false });

        let scope = EvaluationScope::new();
        let mut forward_ctx = Context::new(Mode::Mix, Phase::Build, scope.root());
        let forward = id_only.merge(&mut forward_ctx, &name_only).unwrap().unwrap();
        let mut backward_ctx = Context::new(Mode::Mix, Phase::Build, scope.root());
        let backward = name_only.merge(&mut backward_ctx, &id_only).unwrap().unwrap();

        let bind_and_render = |schema: &Arc<SchemaNode>| {
            let scope = EvaluationScope::new();
            scope.bind(scope.root(), "id", Binding::Value(id.clone()));
            scope.bind(scope.root(), "name", Binding::Value(name.clone()));
            let mut ctx = Context::new(Mode::Render, Phase::Build, scope.root());
            schema.render(&mut ctx, &scope, None).unwrap().unwrap()
        };
        prop_assert_eq!(bind_and_render(&forward), bind_and_render(&backward));
    }
}

/// Invariant 2: *Idempotent merge.* `merge(merge(S, T), T) ≡ merge(S, T)`
/// for any template `T` that would merge successfully into `S`.
#[test]
fn idempotent_merge_of_object_fields() {
    let base = object_schema("id");
    let addition = object_schema("name");

    let scope = EvaluationScope::new();
    let mut ctx = Context::new(Mode::Mix, Phase::Build, scope.root());
    let once = base.merge(&mut ctx, &addition).unwrap().unwrap();
    let mut ctx = Context::new(Mode::Mix, Phase::Build, scope.root());
    let twice = once.merge(&mut ctx, &addition).unwrap().unwrap();

    let render = |schema: &Arc<SchemaNode>| {
        let scope = EvaluationScope::new();
        scope.bind(scope.root(), "id", Binding::Value("42".to_string()));
        scope.bind(scope.root(), "name", Binding::Value("Acme".to_string()));
        let mut ctx = Context::new(Mode::Render, Phase::Build, scope.root());
        schema.render(&mut ctx, &scope, None).unwrap().unwrap()
    };
    assert_eq!(render(&once), render(&twice));
}

/// Invariant 6: *Cycle detection.* A mutual import between two frames for
/// the same identifier raises `cycle` rather than overflowing the stack.
#[test]
fn cycle_detection_on_mutual_import() {
    let scope = EvaluationScope::new();
    let root = scope.root();
    let a = scope.subscope(root, ScopeLabel("scoped:a".to_string()));
    let b = scope.subscope(root, ScopeLabel("scoped:b".to_string()));
    scope.import(a, "b", b);
    scope.import(b, "a", a);
    let err = scope.resolve(a, "shared").unwrap_err();
    assert_eq!(err.kind(), "cycle");
}

/// Boundary: an empty object template merges into any structural template
/// without adding fields.
#[test]
fn empty_object_merge_adds_no_fields() {
    let schema = object_schema("id");
    let empty = Arc::new(SchemaNode::Object {
        fields: indexmap::IndexMap::new(),
        archetype: None,
        scoped: false,
    });
    let scope = EvaluationScope::new();
    let mut ctx = Context::new(Mode::Mix, Phase::Build, scope.root());
    let merged = schema.merge(&mut ctx, &empty).unwrap().unwrap();
    let SchemaNode::Object { fields, .. } = merged.as_ref() else {
        panic!("expected object");
    };
    assert_eq!(fields.len(), 1);
    assert!(fields.contains_key("id"));
}

/// Boundary: `stub(null)` in match mode with no template raises
/// `match/required`.
#[test]
fn stub_without_fallback_fails_match_with_required_diagnostic() {
    let stub = Arc::new(SchemaNode::Stub(None));
    let scope = EvaluationScope::new();
    let mut ctx = Context::new(Mode::Match, Phase::Validate, scope.root());
    let matched = stub.match_literal(&mut ctx, &scope, &serde_json::json!("anything")).unwrap();
    assert!(!matched);
    assert_eq!(ctx.diagnostics()[0].message, "required");
}
