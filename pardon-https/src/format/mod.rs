//! Parses an `.https` source file into a sequence of [`Step`]s, each
//! carrying a schema tree for its request or response (spec.md §4.6).

pub mod config;

use std::sync::Arc;

use indexmap::IndexMap;
use pardon_core::{Pattern, ScalarType, SchemaNode};

use crate::error::{self, HttpsError};

pub use config::Configuration;

/// One `>>>` or `<<<` block parsed out of an `.https` file.
#[derive(Debug, Clone)]
pub enum Step {
    Request(RequestStep),
    Response(ResponseStep),
}

#[derive(Debug, Clone)]
pub struct RequestStep {
    pub method: Pattern,
    pub url: Pattern,
    pub headers: Vec<(Pattern, Pattern)>,
    pub body: Option<Arc<SchemaNode>>,
}

#[derive(Debug, Clone)]
pub struct ResponseStep {
    /// `None` when the status marker was a plain `<<<` with no status line
    /// (matches any status); `Some(pattern)` for `2xx`/`404`-style markers.
    pub status: Option<String>,
    pub headers: Vec<(Pattern, Pattern)>,
    pub body: Option<Arc<SchemaNode>>,
}

/// A fully parsed `.https` file: its configuration header plus the ordered
/// steps that follow. Consecutive response steps are folded into a single
/// `deferred` schema keyed by status (spec.md §4.6: "Multiple responses in
/// sequence form a `deferred` polymorphic schema").
#[derive(Debug, Clone)]
pub struct HttpsFile {
    pub configuration: Configuration,
    pub steps: Vec<Step>,
}

impl HttpsFile {
    /// # Errors
    /// Returns [`HttpsError`] on a malformed configuration header or an
    /// unparseable step.
    pub fn parse(source: &str) -> Result<Self, HttpsError> {
        let (header, body) = split_header(source);
        let configuration = Configuration::parse(header)?;
        let steps = parse_steps(body)?;
        Ok(Self { configuration, steps })
    }

    /// Folds the parsed steps into the request/response schema pair an
    /// endpoint is built from: a single request schema (the first request
    /// step, mixed with any later ones) and a single possibly-`deferred`
    /// response schema.
    pub fn to_schemas(&self) -> Result<(Arc<SchemaNode>, Option<Arc<SchemaNode>>), HttpsError> {
        let mut request_schema: Option<Arc<SchemaNode>> = None;
        let mut response_arms = Vec::new();
        for step in &self.steps {
            match step {
                Step::Request(request) => {
                    let schema = request_to_schema(request);
                    request_schema = Some(schema);
                }
                Step::Response(response) => {
                    let schema = response_to_schema(response);
                    let rule = match &response.status {
                        Some(status) => pardon_core::DeferredRule::StatusRange(status.clone()),
                        None => pardon_core::DeferredRule::Always,
                    };
                    response_arms.push(pardon_core::DeferredArm { rule, schema });
                }
            }
        }
        let request = request_schema.ok_or_else(|| {
            error::StepCtx {
                line: 0usize,
                message: "file has no request step".to_string(),
            }
            .build()
        })?;
        // Always fold into `deferred`, even for a single response step: the
        // status is checked by the arm's rule rather than a `status` field
        // on the schema, so one arm or several are handled uniformly.
        let response = if response_arms.is_empty() {
            None
        } else {
            Some(Arc::new(SchemaNode::Deferred(response_arms)))
        };
        Ok((request, response))
    }
}

fn request_to_schema(request: &RequestStep) -> Arc<SchemaNode> {
    let mut fields = IndexMap::new();
    fields.insert("method".to_string(), SchemaNode::scalar(ScalarType::String, request.method.clone()));
    fields.insert("url".to_string(), SchemaNode::scalar(ScalarType::String, request.url.clone()));
    fields.insert("headers".to_string(), headers_to_schema(&request.headers));
    if let Some(body) = &request.body {
        fields.insert("body".to_string(), body.clone());
    }
    Arc::new(SchemaNode::Object { fields, archetype: None, scoped: true })
}

fn response_to_schema(response: &ResponseStep) -> Arc<SchemaNode> {
    // `status` is checked by the enclosing `deferred` arm's rule, not as a
    // field on this object — see `to_schemas`.
    let mut fields = IndexMap::new();
    fields.insert("headers".to_string(), headers_to_schema(&response.headers));
    if let Some(body) = &response.body {
        fields.insert("body".to_string(), body.clone());
    }
    Arc::new(SchemaNode::Object { fields, archetype: None, scoped: true })
}

fn headers_to_schema(headers: &[(Pattern, Pattern)]) -> Arc<SchemaNode> {
    let mut fields = IndexMap::new();
    for (name, value) in headers {
        if let Some(literal) = name.holes().next().is_none().then(|| name.source().to_string()) {
            fields.insert(literal, SchemaNode::scalar(ScalarType::String, value.clone()));
        }
    }
    Arc::new(SchemaNode::Object { fields, archetype: None, scoped: false })
}

/// Splits a `.https` source into the leading YAML header and the remaining
/// step text, the header ending at the first line consisting only of `>>>`.
fn split_header(source: &str) -> (&str, &str) {
    if let Some(index) = source.find("\n>>>") {
        // The marker line itself starts the first step.
        (&source[..index], &source[index + 1..])
    } else {
        ("", source)
    }
}

fn parse_steps(body: &str) -> Result<Vec<Step>, HttpsError> {
    let mut steps = Vec::new();
    let lines: Vec<&str> = body.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim_end();
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            i += 1;
            continue;
        }
        if line.starts_with(">>>") {
            let (step, next) = parse_request(&lines, i)?;
            steps.push(Step::Request(step));
            i = next;
        } else if line.starts_with("<<<") {
            let (step, next) = parse_response(&lines, i)?;
            steps.push(Step::Response(step));
            i = next;
        } else {
            return Err(error::StepCtx {
                line: i + 1,
                message: format!("expected `>>>` or `<<<`, found `{line}`"),
            }
            .build());
        }
    }
    Ok(steps)
}

/// Consumes lines until the next step marker or end of input, returning the
/// block body and the index to resume parsing at.
fn take_block<'a>(lines: &[&'a str], start: usize) -> (Vec<&'a str>, usize) {
    let mut end = start;
    while end < lines.len() {
        let trimmed = lines[end].trim_start();
        if end != start && (trimmed.starts_with(">>>") || trimmed.starts_with("<<<")) {
            break;
        }
        end += 1;
    }
    (lines[start..end].to_vec(), end)
}

fn parse_request(lines: &[&str], start: usize) -> Result<(RequestStep, usize), HttpsError> {
    let (block, next) = take_block(lines, start);
    let mut body_lines = block.iter().skip(1).filter(|l| !l.trim_start().starts_with('#'));
    let Some(method_url) = body_lines.next() else {
        return Err(error::StepCtx {
            line: start + 1,
            message: "request step has no method/url line".to_string(),
        }
        .build());
    };
    let (method, url) = method_url
        .trim()
        .split_once(' ')
        .ok_or_else(|| {
            error::StepCtx {
                line: start + 2,
                message: format!("expected `METHOD URL`, found `{method_url}`"),
            }
            .build()
        })?;
    let method = Pattern::parse(method.trim())?;
    let url = Pattern::parse(url.trim())?;
    let (headers, body_text) = parse_headers_and_body(body_lines)?;
    let headers = parse_header_patterns(&headers)?;
    let body = parse_body(&headers, &body_text)?;
    Ok((RequestStep { method, url, headers, body }, next))
}

fn parse_response(lines: &[&str], start: usize) -> Result<(ResponseStep, usize), HttpsError> {
    let (block, next) = take_block(lines, start);
    let mut body_lines = block.iter().skip(1).filter(|l| !l.trim_start().starts_with('#'));
    let status = parse_status_marker(block[0]);
    let first = body_lines.clone().next();
    // A status line (e.g. "200 OK") right after the marker is informational
    // only; the marker itself (`<<< 200` / `<<< 2xx`) carries the rule.
    if let Some(line) = first {
        if status.is_some() && line.trim().chars().next().is_some_and(|c| c.is_ascii_digit()) {
            body_lines.next();
        }
    }
    let (headers, body_text) = parse_headers_and_body(body_lines)?;
    let headers = parse_header_patterns(&headers)?;
    let body = parse_body(&headers, &body_text)?;
    Ok((ResponseStep { status, headers, body }, next))
}

fn parse_status_marker(marker_line: &str) -> Option<String> {
    let rest = marker_line.trim_start_matches("<<<").trim();
    if rest.is_empty() {
        None
    } else {
        rest.split_whitespace().next().map(str::to_string)
    }
}

fn parse_headers_and_body<'a>(lines: impl Iterator<Item = &'a &'a str>) -> Result<(Vec<(String, String)>, String), HttpsError> {
    let mut headers = Vec::new();
    let mut in_body = false;
    let mut body_lines = Vec::new();
    for line in lines {
        if in_body {
            body_lines.push(*line);
            continue;
        }
        if line.trim().is_empty() {
            in_body = true;
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }
    Ok((headers, body_lines.join("\n")))
}

fn parse_header_patterns(headers: &[(String, String)]) -> Result<Vec<(Pattern, Pattern)>, HttpsError> {
    headers
        .iter()
        .map(|(name, value)| Ok((Pattern::parse(name)?, Pattern::parse(value)?)))
        .collect()
}

/// Chooses the body schema by content-type, per spec.md §4.6: JSON bodies
/// become `json(object(...))`, form bodies `form(keyed.mv(...))`, anything
/// else a plain text scalar.
fn parse_body(headers: &[(Pattern, Pattern)], body_text: &str) -> Result<Option<Arc<SchemaNode>>, HttpsError> {
    if body_text.trim().is_empty() {
        return Ok(None);
    }
    let content_type = headers
        .iter()
        .find(|(name, _)| name.source().eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| value.source().to_string())
        .unwrap_or_default();
    if content_type.contains("json") {
        let schema = json_body_to_schema(body_text)?;
        return Ok(Some(Arc::new(SchemaNode::Encoded {
            encoding: pardon_core::Encoding::Json,
            inner: schema,
        })));
    }
    if content_type.contains("x-www-form-urlencoded") {
        let schema = form_body_to_schema(body_text)?;
        return Ok(Some(Arc::new(SchemaNode::Encoded {
            encoding: pardon_core::Encoding::Form,
            inner: schema,
        })));
    }
    Ok(Some(SchemaNode::scalar(ScalarType::String, Pattern::parse(body_text)?)))
}

/// Walks a JSON body textually, turning each string leaf into a pattern
/// (so `{{holes}}` inside string literals still parse) while non-string
/// leaves become literal `value` nodes.
fn json_body_to_schema(text: &str) -> Result<Arc<SchemaNode>, HttpsError> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|source| {
        error::StepCtx {
            line: 0usize,
            message: format!("invalid JSON body: {source}"),
        }
        .build()
    })?;
    json_value_to_schema(&value)
}

fn json_value_to_schema(value: &serde_json::Value) -> Result<Arc<SchemaNode>, HttpsError> {
    Ok(match value {
        serde_json::Value::String(s) => SchemaNode::scalar(ScalarType::String, Pattern::parse(s)?),
        serde_json::Value::Object(map) => {
            let mut fields = IndexMap::new();
            for (key, value) in map {
                fields.insert(key.clone(), json_value_to_schema(value)?);
            }
            Arc::new(SchemaNode::Object { fields, archetype: None, scoped: false })
        }
        serde_json::Value::Array(items) => {
            let elements = items.iter().map(json_value_to_schema).collect::<Result<Vec<_>, _>>()?;
            Arc::new(SchemaNode::Tuple(elements))
        }
        other => Arc::new(SchemaNode::Value(other.clone())),
    })
}

fn form_body_to_schema(text: &str) -> Result<Arc<SchemaNode>, HttpsError> {
    let mut fields = IndexMap::new();
    for pair in text.trim().split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        fields.insert(key.to_string(), SchemaNode::scalar(ScalarType::String, Pattern::parse(value)?));
    }
    Ok(Arc::new(SchemaNode::Object { fields, archetype: None, scoped: false }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get_request() {
        let source = "\n>>>\nGET https://api.example.com/v1/things/{{id}}\n\n";
        let file = HttpsFile::parse(source).unwrap();
        assert_eq!(file.steps.len(), 1);
        let Step::Request(request) = &file.steps[0] else {
            panic!("expected request step");
        };
        assert_eq!(request.method.source(), "GET");
        assert_eq!(request.url.source(), "https://api.example.com/v1/things/{{id}}");
    }

    #[test]
    fn parses_json_body_with_computed_field() {
        let source = concat!(
            "\n>>>\n",
            "POST https://api.example.com/v1/things\n",
            "Content-Type: application/json\n",
            "\n",
            "{\"name\": \"{{name}}\"}\n",
        );
        let file = HttpsFile::parse(source).unwrap();
        let Step::Request(request) = &file.steps[0] else {
            panic!("expected request step");
        };
        assert!(request.body.is_some());
    }

    #[test]
    fn folds_multiple_responses_into_deferred() {
        let source = concat!(
            "\n>>>\n",
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
        let file = HttpsFile::parse(source).unwrap();
        assert_eq!(file.steps.len(), 3);
        let (_, response) = file.to_schemas().unwrap();
        assert!(matches!(response.unwrap().as_ref(), SchemaNode::Deferred(arms) if arms.len() == 2));
    }

    #[test]
    fn parses_configuration_header() {
        let source = "name: get-thing\ndefaults:\n  host: localhost\n>>>\nGET https://{{host}}/v1/things\n\n";
        let file = HttpsFile::parse(source).unwrap();
        assert_eq!(file.configuration.name.as_deref(), Some("get-thing"));
    }

    #[test]
    fn ignores_comment_lines() {
        let source = "\n>>>\n# a comment\nGET https://api.example.com/v1/things\n\n";
        let file = HttpsFile::parse(source).unwrap();
        assert_eq!(file.steps.len(), 1);
    }
}
