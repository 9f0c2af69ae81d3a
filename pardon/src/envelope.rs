//! The request/response envelope (spec.md §4.8): the scoped object a
//! rendered `.https` request or response is projected into, with
//! `method`/`origin`/`pathname`/`searchParams`/`headers`/`body`/`meta`
//! fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::PardonEngineError;

/// A fully rendered outgoing request, split into the fields an HTTP client
/// or a test assertion addresses independently rather than one opaque URL
/// string (spec.md §4.8).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub method: String,
    pub origin: String,
    pub pathname: String,
    pub search_params: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
    /// Free-form metadata carried alongside the request but not sent on the
    /// wire (flow step name, retry count, …).
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl RequestEnvelope {
    /// Builds an envelope from a rendered request object shaped
    /// `{method, url, headers, body?}`, splitting `url` into its
    /// origin/pathname/search components.
    pub fn from_rendered(value: &serde_json::Value) -> Result<Self, PardonEngineError> {
        let method = value.get("method").and_then(serde_json::Value::as_str).unwrap_or("GET").to_string();
        let url_text = value.get("url").and_then(serde_json::Value::as_str).unwrap_or_default();
        let url = Url::parse(url_text).map_err(|source| {
            pardon_core::error::ParseCtx {
                loc: "url".to_string(),
                message: format!("invalid request url `{url_text}`: {source}"),
            }
            .build()
        })?;
        let search_params = url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect();
        let headers = value
            .get("headers")
            .and_then(serde_json::Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            method,
            origin: format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default()),
            pathname: url.path().to_string(),
            search_params,
            headers,
            body: value.get("body").cloned(),
            meta: serde_json::Map::new(),
        })
    }
}

/// The two request projections `Engine::render` produces in one pass: the
/// real request and the version a caller can log or display without
/// leaking `@secret` values (spec.md §6: `render(init) -> { request, redacted }`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rendered {
    pub request: RequestEnvelope,
    pub redacted: RequestEnvelope,
}

/// A received (or synthesized, for test fixtures) response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
}

impl ResponseEnvelope {
    /// Projects this response into the object shape a response schema
    /// matches against: `{status, headers, body}`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert("status".to_string(), serde_json::json!(self.status));
        map.insert(
            "headers".to_string(),
            serde_json::to_value(&self.headers).unwrap_or_default(),
        );
        if let Some(body) = &self.body {
            map.insert("body".to_string(), body.clone());
        }
        serde_json::Value::Object(map)
    }
}
