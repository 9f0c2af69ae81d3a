//! Engine-level scenarios exercised through `.https` sources, mirroring how
//! a caller actually drives `Engine::render`/`preview`/`match_endpoint`.

use std::sync::Arc;

use pardon::expression::MapScriptEnvironment;
use pardon::Engine;
use pardon_core::scope::ScopeLabel;
use pretty_assertions::assert_eq;

#[test]
fn simple_get_preview_renders_url_with_no_headers() {
    let source = concat!("name: get-thing\n", ">>>\n", "GET https://api.example.com/v1/things/{{id}}\n\n");
    let engine = Engine::builder().source(source).finish().unwrap();
    let preview = engine.preview("get-thing", &[("id", "42")]).unwrap();
    assert_eq!(preview["method"], "GET");
    assert_eq!(preview["url"], "https://api.example.com/v1/things/42");
    assert_eq!(preview["headers"], serde_json::json!({}));
}

#[test]
fn json_body_with_computed_field() {
    let source = concat!(
        "name: create-thing\n",
        ">>>\n",
        "POST https://api.example.com/v1/things\n",
        "Content-Type: application/json\n",
        "\n",
        "{\"name\": \"{{name}}\", \"slug\": \"{{= name.toLowerCase() }}\"}\n",
    );
    let engine = Engine::builder()
        .source(source)
        .environment(Arc::new(MapScriptEnvironment::new()))
        .finish()
        .unwrap();
    let rendered = engine.render("create-thing", &[("name", "Acme")]).unwrap();
    let body = rendered.request.body.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(body.as_str().unwrap()).unwrap();
    assert_eq!(parsed, serde_json::json!({"name": "Acme", "slug": "acme"}));
}

#[test]
fn form_body_round_trips_through_render_and_match() {
    let source = concat!(
        "name: submit-form\n",
        ">>>\n",
        "POST https://api.example.com/v1/submit\n",
        "Content-Type: application/x-www-form-urlencoded\n",
        "\n",
        "a={{a}}&b={{b}}\n",
    );
    let engine = Engine::builder().source(source).finish().unwrap();
    let rendered = engine.render("submit-form", &[("a", "1"), ("b", "2 3")]).unwrap();
    let body = rendered.request.body.clone().unwrap();
    // `form_urlencoded` escapes spaces as `+`, not `%20` (see DESIGN.md).
    assert_eq!(body, serde_json::json!("a=1&b=2+3"));

    let request = serde_json::json!({
        "method": "POST",
        "url": "https://api.example.com/v1/submit",
        "headers": {"Content-Type": "application/x-www-form-urlencoded"},
        "body": body,
    });
    let (endpoint, scope) = engine.match_endpoint(&request, None).unwrap();
    assert_eq!(endpoint.configuration.name.as_deref(), Some("submit-form"));
    let body_frame = scope.subscope(scope.root(), ScopeLabel("field:body".to_string()));
    assert_eq!(scope.resolve(body_frame, "a").unwrap().as_deref(), Some("1"));
    assert_eq!(scope.resolve(body_frame, "b").unwrap().as_deref(), Some("2 3"));
}

#[test]
fn secret_redaction_hides_token_and_redacted_form_fails_to_match() {
    let source = concat!(
        "name: authed-thing\n",
        ">>>\n",
        "GET https://api.example.com/v1/things\n",
        "Authorization: {{@token}}\n",
    );
    let engine = Engine::builder().source(source).finish().unwrap();
    let rendered = engine.render("authed-thing", &[("token", "sek")]).unwrap();
    assert_eq!(rendered.request.headers.get("Authorization").map(String::as_str), Some("sek"));
    assert_eq!(
        rendered.redacted.headers.get("Authorization").map(String::as_str),
        Some(pardon_core::REDACTED)
    );

    let redacted_request = serde_json::json!({
        "method": "GET",
        "url": "https://api.example.com/v1/things",
        "headers": {"Authorization": pardon_core::REDACTED},
    });
    let result = engine.match_endpoint(&redacted_request, None);
    assert!(result.is_err(), "a redacted request must not match its own endpoint's request schema");
}

#[test]
fn polymorphic_response_binds_only_the_matching_arms_fields() {
    let source = concat!(
        "name: get-thing\n",
        ">>>\n",
        "GET https://api.example.com/v1/things/{{id}}\n",
        "\n",
        "<<< 200\n",
        "Content-Type: application/json\n",
        "\n",
        "{\"ok\": true, \"id\": \"{{id}}\"}\n",
        "<<< 4xx\n",
        "Content-Type: application/json\n",
        "\n",
        "{\"error\": \"{{msg}}\"}\n",
    );
    let engine = Engine::builder().source(source).finish().unwrap();
    let request = serde_json::json!({
        "method": "GET",
        "url": "https://api.example.com/v1/things/42",
        "headers": {},
    });
    let response = serde_json::json!({
        "status": 404,
        "headers": {"Content-Type": "application/json"},
        "body": "{\"error\": \"missing\"}",
    });
    let (_, scope) = engine.match_endpoint(&request, Some(&response)).unwrap();
    let body_frame = scope.subscope(scope.root(), ScopeLabel("field:body".to_string()));
    assert_eq!(scope.resolve(body_frame, "msg").unwrap().as_deref(), Some("missing"));
    assert_eq!(scope.resolve(body_frame, "id").unwrap(), None);
}

#[test]
fn default_chain_resolves_by_discriminator_or_falls_back() {
    let source = concat!(
        "name: get-thing\n",
        "defaults:\n",
        "  host:\n",
        "    env:\n",
        "      prod: api.example.com\n",
        "      stage: api.stage.example.com\n",
        "      default: localhost\n",
        ">>>\n",
        "GET https://{{host}}/v1/things\n",
        "\n",
    );
    let engine = Engine::builder().source(source).finish().unwrap();

    let staged = engine.preview("get-thing", &[("env", "stage")]).unwrap();
    assert_eq!(staged["url"], "https://api.stage.example.com/v1/things");

    let fallback = engine.preview("get-thing", &[]).unwrap();
    assert_eq!(fallback["url"], "https://localhost/v1/things");
}
