//! Reversible textual encodings wrapping an inner schema (spec.md §4.2).

use std::sync::Arc;

use base64::Engine as _;

use crate::error::{self, PardonError};
use crate::schema::{SchemaNode, ScalarType};

/// One of the required encodings named in spec.md §4.2. `decode` turns an
/// encoded outer template into an inner schema tree; `encode` turns a
/// rendered inner value back into outer text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Form,
    Query,
    Base64,
    Headers,
    Text,
}

impl Encoding {
    /// Decodes an outer template node into the inner schema it wraps. For
    /// `Json`/`Form`/`Query`/`Headers`, `other` is expected to already be a
    /// structural schema (built by the `.https` parser from the body's
    /// content type); this just unwraps an `Encoded` layer if present, or
    /// passes the structural schema through.
    pub fn decode(&self, other: &Arc<SchemaNode>) -> Result<Arc<SchemaNode>, PardonError> {
        match other.as_ref() {
            SchemaNode::Encoded { inner, .. } => Ok(inner.clone()),
            _ => Ok(other.clone()),
        }
    }

    /// Decodes a rendered outer string directly into a JSON value, used by
    /// `match_literal` on an already-rendered request/response.
    pub fn decode_value(&self, text: &str) -> Result<serde_json::Value, PardonError> {
        match self {
            Encoding::Json => serde_json::from_str(text).map_err(|source| parse_err(format!("invalid JSON: {source}"))),
            Encoding::Form | Encoding::Query => Ok(decode_form(text)),
            Encoding::Base64 => {
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(text)
                    .map_err(|source| parse_err(format!("invalid base64: {source}")))?;
                String::from_utf8(decoded)
                    .map(serde_json::Value::String)
                    .map_err(|source| parse_err(format!("base64 payload is not UTF-8: {source}")))
            }
            Encoding::Headers => Ok(decode_form(text)),
            Encoding::Text => Ok(serde_json::Value::String(text.to_string())),
        }
    }

    /// Encodes a rendered inner value to its outer textual form.
    pub fn encode(&self, value: &serde_json::Value) -> Result<String, PardonError> {
        match self {
            Encoding::Json => serde_json::to_string(value).map_err(|source| internal_err(format!("failed to encode JSON: {source}"))),
            Encoding::Form | Encoding::Query => Ok(encode_form(value)),
            Encoding::Base64 => {
                let text = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                Ok(base64::engine::general_purpose::STANDARD.encode(text))
            }
            Encoding::Headers => Ok(encode_form(value)),
            Encoding::Text => Ok(match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
        }
    }
}

fn decode_form(text: &str) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for pair in form_urlencoded::parse(text.as_bytes()) {
        let (key, value) = pair;
        map.entry(key.into_owned())
            .and_modify(|existing| {
                if let serde_json::Value::Array(items) = existing {
                    items.push(serde_json::Value::String(value.clone().into_owned()));
                } else {
                    let prior = existing.take();
                    *existing = serde_json::Value::Array(vec![prior, serde_json::Value::String(value.clone().into_owned())]);
                }
            })
            .or_insert_with(|| serde_json::Value::String(value.into_owned()));
    }
    serde_json::Value::Object(map)
}

fn encode_form(value: &serde_json::Value) -> String {
    let serde_json::Value::Object(map) = value else {
        return String::new();
    };
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in map {
        match value {
            serde_json::Value::Array(items) => {
                for item in items {
                    serializer.append_pair(key, &scalar_text(item));
                }
            }
            other => {
                serializer.append_pair(key, &scalar_text(other));
            }
        }
    }
    serializer.finish()
}

fn scalar_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn parse_err(message: String) -> PardonError {
    error::ParseCtx { loc: "encoding".to_string(), message }.build()
}

fn internal_err(message: String) -> PardonError {
    error::InternalCtx { loc: "encoding".to_string(), message }.build()
}

/// Builds the structural schema an `.https` body of a given content-type
/// decodes to before encoding-wrapping, per spec.md §4.6's parsing rules
/// (`json → object`, `form → keyed.mv`, else `text`).
#[must_use]
pub fn default_schema_for(encoding: &Encoding) -> Arc<SchemaNode> {
    match encoding {
        Encoding::Json => Arc::new(SchemaNode::Object {
            fields: indexmap::IndexMap::new(),
            archetype: Some(SchemaNode::scalar(ScalarType::String, crate::pattern::Pattern::parse("{{}}").unwrap())),
            scoped: false,
        }),
        Encoding::Form | Encoding::Query | Encoding::Headers => Arc::new(SchemaNode::Multivalue {
            base: Arc::new(SchemaNode::Object {
                fields: indexmap::IndexMap::new(),
                archetype: None,
                scoped: false,
            }),
            archetype: SchemaNode::scalar(ScalarType::String, crate::pattern::Pattern::parse("{{}}").unwrap()),
        }),
        Encoding::Base64 | Encoding::Text => SchemaNode::scalar(ScalarType::String, crate::pattern::Pattern::parse("{{}}").unwrap()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_round_trips_through_encode_decode() {
        let encoding = Encoding::Form;
        let value = serde_json::json!({"a": "1", "b": "2 3"});
        let encoded = encoding.encode(&value).unwrap();
        assert_eq!(encoded, "a=1&b=2+3");
        let decoded = encoding.decode_value(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn base64_round_trips() {
        let encoding = Encoding::Base64;
        let value = serde_json::json!("hello");
        let encoded = encoding.encode(&value).unwrap();
        let decoded = encoding.decode_value(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn json_round_trips_preserving_structure() {
        let encoding = Encoding::Json;
        let value = serde_json::json!({"name": "Acme", "slug": "acme"});
        let encoded = encoding.encode(&value).unwrap();
        let decoded = encoding.decode_value(&encoded).unwrap();
        assert_eq!(decoded, value);
    }
}
