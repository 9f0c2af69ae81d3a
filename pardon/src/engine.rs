//! The engine: a set of endpoints built from `.https` sources, exposing
//! `match`/`preview`/`render`/`process` over them (spec.md §6).

use std::sync::Arc;

use pardon_core::scope::{Binding, EvaluationScope};
use pardon_core::{Context, Mode, Phase};
use pardon_https::HttpsFile;

use crate::endpoint::Endpoint;
use crate::envelope::{Rendered, RequestEnvelope, ResponseEnvelope};
use crate::error::PardonEngineError;
use crate::expression::{NullScriptEnvironment, ScriptEnvironment};
use crate::fetch::Fetch;
use crate::lookup::EngineLookup;

/// A loaded set of endpoints plus the expression host they render through.
pub struct Engine {
    endpoints: Vec<Endpoint>,
    environment: Arc<dyn ScriptEnvironment>,
}

impl Engine {
    #[must_use]
    pub fn builder() -> Build {
        Build::default()
    }

    /// Renders a request envelope for `endpoint` with `inputs` bound into a
    /// fresh scope, alongside a redacted twin with every `@secret` value
    /// replaced by [`pardon_core::REDACTED`] (spec.md §6, `render`: "two-pass
    /// if secrets present"). Runs a prerender pass, then a postrender pass
    /// once any flow-dependent values are available — for an engine with no
    /// `Fetch` dependency this reduces to one pass per envelope.
    pub fn render(&self, endpoint_name: &str, inputs: &[(&str, &str)]) -> Result<Rendered, PardonEngineError> {
        let endpoint = self.find(endpoint_name)?;
        let scope = EvaluationScope::new();
        let frame = scope.root();
        for (name, value) in inputs {
            scope.bind(frame, *name, Binding::Value((*value).to_string()));
        }
        endpoint.declare_defaults(&scope, frame)?;
        let lookup = EngineLookup {
            scope: &scope,
            frame,
            environment: self.environment.as_ref(),
        };

        let mut ctx = Context::new(Mode::Render, Phase::Build, frame);
        let rendered = endpoint.request.render(&mut ctx, &scope, Some(&lookup))?;
        let value = ctx.into_result(rendered)?;
        let request = RequestEnvelope::from_rendered(&value)?;

        let mut redacted_ctx = Context::new(Mode::Render, Phase::Build, frame).with_secrets(false);
        let redacted_rendered = endpoint.request.render(&mut redacted_ctx, &scope, Some(&lookup))?;
        let redacted_value = redacted_ctx.into_result(redacted_rendered)?;
        let redacted = RequestEnvelope::from_rendered(&redacted_value)?;

        Ok(Rendered { request, redacted })
    }

    /// Best-effort render tolerating unbound holes (spec.md §6, `preview`).
    pub fn preview(&self, endpoint_name: &str, inputs: &[(&str, &str)]) -> Result<serde_json::Value, PardonEngineError> {
        let endpoint = self.find(endpoint_name)?;
        let scope = EvaluationScope::new();
        let frame = scope.root();
        for (name, value) in inputs {
            scope.bind(frame, *name, Binding::Value((*value).to_string()));
        }
        endpoint.declare_defaults(&scope, frame)?;
        let lookup = EngineLookup {
            scope: &scope,
            frame,
            environment: self.environment.as_ref(),
        };
        let mut ctx = Context::new(Mode::Preview, Phase::Build, frame);
        let rendered = endpoint.request.render(&mut ctx, &scope, Some(&lookup))?;
        Ok(ctx.into_result(rendered)?)
    }

    /// Matches `request`/`response` against every endpoint's schemas,
    /// returning the first one whose request (and response, if present)
    /// structurally matches, along with the bound scope (spec.md §6, `match`).
    pub fn match_endpoint(
        &self,
        request: &serde_json::Value,
        response: Option<&serde_json::Value>,
    ) -> Result<(&Endpoint, EvaluationScope), PardonEngineError> {
        for endpoint in &self.endpoints {
            let scope = EvaluationScope::new();
            let frame = scope.root();
            let mut ctx = Context::new(Mode::Match, Phase::Validate, frame);
            let request_matched = endpoint.request.match_literal(&mut ctx, &scope, request)?;
            if !request_matched {
                continue;
            }
            if let (Some(expected), Some(response_schema)) = (response, &endpoint.response) {
                let mut response_ctx = Context::new(Mode::Match, Phase::Validate, frame);
                if !response_schema.match_literal(&mut response_ctx, &scope, expected)? {
                    continue;
                }
            }
            return Ok((endpoint, scope));
        }
        Err(crate::error::NoMatchCtx {
            reason: "no endpoint's request schema matched".to_string(),
        }
        .build())
    }

    /// Renders `endpoint_name`, sends it through `fetch`, and matches the
    /// response against the endpoint's response schema (spec.md §6, `process`).
    pub async fn process(
        &self,
        endpoint_name: &str,
        inputs: &[(&str, &str)],
        fetch: &dyn Fetch,
    ) -> Result<ResponseEnvelope, PardonEngineError> {
        let request = self.render(endpoint_name, inputs)?.request;
        let response = fetch.fetch(&request).await?;
        let endpoint = self.find(endpoint_name)?;
        if let Some(schema) = &endpoint.response {
            let scope = EvaluationScope::new();
            let mut ctx = Context::new(Mode::Match, Phase::Validate, scope.root());
            let matched = schema.match_literal(&mut ctx, &scope, &response.to_json())?;
            if !matched {
                return Err(crate::error::NoMatchCtx {
                    reason: format!("response did not match endpoint `{endpoint_name}`'s response schema"),
                }
                .build());
            }
        }
        Ok(response)
    }

    fn find(&self, name: &str) -> Result<&Endpoint, PardonEngineError> {
        self.endpoints
            .iter()
            .find(|e| e.configuration.name.as_deref() == Some(name))
            .ok_or_else(|| {
                crate::error::NoMatchCtx {
                    reason: format!("no endpoint named `{name}`"),
                }
                .build()
            })
    }
}

/// Constructs an [`Engine`] from `.https` sources, mirroring the way
/// `grill-core`'s `Build` assembles a compiled schema store one source at a
/// time before finalizing it.
#[derive(Default)]
pub struct Build {
    sources: Vec<String>,
    environment: Option<Arc<dyn ScriptEnvironment>>,
}

impl Build {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one `.https` source's text to the set being built.
    #[must_use]
    pub fn source(mut self, text: impl Into<String>) -> Self {
        self.sources.push(text.into());
        self
    }

    /// Supplies the expression host endpoints will evaluate `= expr` holes
    /// through. Defaults to [`NullScriptEnvironment`] if never called.
    #[must_use]
    pub fn environment(mut self, environment: Arc<dyn ScriptEnvironment>) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Parses every added source into an [`Endpoint`] and finalizes the
    /// engine.
    pub fn finish(self) -> Result<Engine, PardonEngineError> {
        let mut endpoints = Vec::with_capacity(self.sources.len());
        for (index, source) in self.sources.iter().enumerate() {
            let span = tracing::info_span!("compile_https_file", index);
            let _guard = span.enter();
            let file = HttpsFile::parse(source)?;
            tracing::info!(name = file.configuration.name.as_deref().unwrap_or("<unnamed>"), "compiled .https file");
            let (request, response) = file.to_schemas()?;
            endpoints.push(Endpoint::new(request, response, file.configuration));
        }
        Ok(Engine {
            endpoints,
            environment: self.environment.unwrap_or_else(|| Arc::new(NullScriptEnvironment)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_source() -> String {
        concat!(
            "name: get-thing\n",
            "defaults:\n",
            "  host: api.example.com\n",
            ">>>\n",
            "GET https://{{host}}/v1/things/{{id}}\n",
            "\n",
            "<<< 200\n",
            "Content-Type: application/json\n",
            "\n",
            "{\"id\": \"{{id}}\", \"ok\": true}\n",
        )
        .to_string()
    }

    #[test]
    fn renders_request_from_defaults_and_inputs() {
        let engine = Engine::builder().source(sample_source()).finish().unwrap();
        let rendered = engine.render("get-thing", &[("id", "42")]).unwrap();
        assert_eq!(rendered.request.method, "GET");
        assert_eq!(rendered.request.pathname, "/v1/things/42");
        assert_eq!(rendered.request.origin, "https://api.example.com");
        assert_eq!(rendered.redacted.pathname, "/v1/things/42");
    }

    #[test]
    fn redacts_secret_holes_without_affecting_the_real_request() {
        let source = concat!(
            "name: get-secret-thing\n",
            ">>>\n",
            "GET https://api.example.com/v1/things\n",
            "Authorization: {{@token}}\n",
        );
        let engine = Engine::builder().source(source).finish().unwrap();
        let rendered = engine.render("get-secret-thing", &[("token", "sek")]).unwrap();
        assert_eq!(rendered.request.headers.get("Authorization").map(String::as_str), Some("sek"));
        assert_eq!(
            rendered.redacted.headers.get("Authorization").map(String::as_str),
            Some(pardon_core::REDACTED)
        );
    }

    #[test]
    fn preview_tolerates_missing_input() {
        let engine = Engine::builder().source(sample_source()).finish().unwrap();
        let preview = engine.preview("get-thing", &[]).unwrap();
        assert_eq!(preview["method"], "GET");
    }

    #[test]
    fn matches_response_against_endpoint() {
        let engine = Engine::builder().source(sample_source()).finish().unwrap();
        let request = serde_json::json!({
            "method": "GET",
            "url": "https://api.example.com/v1/things/42",
            "headers": {},
        });
        let response = serde_json::json!({
            "status": 200,
            "headers": {"Content-Type": "application/json"},
            "body": "{\"id\": \"42\", \"ok\": true}",
        });
        let (endpoint, scope) = engine.match_endpoint(&request, Some(&response)).unwrap();
        assert_eq!(endpoint.configuration.name.as_deref(), Some("get-thing"));
        let url_frame = scope.subscope(scope.root(), pardon_core::scope::ScopeLabel("field:url".to_string()));
        assert_eq!(scope.resolve(url_frame, "id").unwrap().as_deref(), Some("42"));
    }
}

