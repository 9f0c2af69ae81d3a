//! The endpoint environment (spec.md §4.7): wraps a schema with its
//! declared defaults, import table, config axes, user inputs, secrets and
//! redaction policy.

use std::collections::BTreeMap;
use std::sync::Arc;

use pardon_core::scope::{Binding, EvaluationScope, FrameId, ScopeLabel};
use pardon_core::{PardonError, SchemaNode};
use pardon_https::Configuration;

use crate::secrets::Secrets;

/// A node in the `defaults[name]` tree: either a literal value or a
/// discriminator that recurses by resolving `discriminator` in scope and
/// selecting the matching branch (spec.md §4.4).
#[derive(Debug, Clone)]
pub enum Default {
    Literal(serde_json::Value),
    Discriminator {
        discriminator: String,
        branches: BTreeMap<String, Default>,
        default: Option<Box<Default>>,
    },
    /// `null` at a leaf explicitly unsets rather than falling through.
    Unset,
}

impl Default {
    fn from_yaml(value: &serde_yaml::Value) -> Self {
        match value {
            serde_yaml::Value::Null => Default::Unset,
            serde_yaml::Value::Mapping(map) if looks_like_discriminator(map) => {
                let mut iter = map.iter();
                let (discriminator_key, branches_value) = iter.next().unwrap();
                let discriminator = discriminator_key.as_str().unwrap_or_default().to_string();
                let serde_yaml::Value::Mapping(branches_map) = branches_value else {
                    return Default::Unset;
                };
                let mut branches = BTreeMap::new();
                let mut default = None;
                for (key, value) in branches_map {
                    let key_str = key.as_str().unwrap_or_default();
                    if key_str == "default" {
                        default = Some(Box::new(Default::from_yaml(value)));
                    } else {
                        branches.insert(key_str.to_string(), Default::from_yaml(value));
                    }
                }
                Default::Discriminator {
                    discriminator,
                    branches,
                    default,
                }
            }
            other => Default::Literal(yaml_to_json(other)),
        }
    }

    /// Resolves this default tree against `scope`, recursing through
    /// discriminator branches.
    pub fn resolve(&self, scope: &EvaluationScope, frame: FrameId) -> Result<Option<serde_json::Value>, PardonError> {
        match self {
            Default::Unset => Ok(None),
            Default::Literal(v) => Ok(Some(v.clone())),
            Default::Discriminator {
                discriminator,
                branches,
                default,
            } => {
                let key = scope.resolve(frame, discriminator)?;
                if let Some(key) = key {
                    if let Some(branch) = branches.get(&key) {
                        return branch.resolve(scope, frame);
                    }
                }
                match default {
                    Some(d) => d.resolve(scope, frame),
                    None => Ok(None),
                }
            }
        }
    }
}

fn looks_like_discriminator(map: &serde_yaml::Mapping) -> bool {
    map.len() == 1
        && map
            .values()
            .next()
            .is_some_and(|v| matches!(v, serde_yaml::Value::Mapping(_)))
}

fn yaml_to_json(value: &serde_yaml::Value) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}

/// Wraps a request/response schema pair with the configuration parsed from
/// an `.https` file header.
pub struct Endpoint {
    pub request: Arc<SchemaNode>,
    pub response: Option<Arc<SchemaNode>>,
    pub defaults: BTreeMap<String, Default>,
    pub secrets: Secrets,
    pub configuration: Configuration,
}

impl Endpoint {
    #[must_use]
    pub fn new(request: Arc<SchemaNode>, response: Option<Arc<SchemaNode>>, configuration: Configuration) -> Self {
        let defaults = configuration
            .defaults
            .iter()
            .map(|(name, value)| (name.clone(), Default::from_yaml(value)))
            .collect();
        Self {
            request,
            response,
            defaults,
            secrets: Secrets::new(),
            configuration,
        }
    }

    /// Seeds the default chain into `frame`, then declares every variable
    /// the request schema names (spec.md §4.7: "input → secret → default
    /// chain"). Defaults are bound *before* `declare` so that nested scoped
    /// fields resolve them through the parent chain rather than having
    /// `declare` shadow them with an explicit `Undefined`.
    pub fn declare_defaults(&self, scope: &EvaluationScope, frame: FrameId) -> Result<(), PardonError> {
        for (name, default) in &self.defaults {
            if scope.resolve(frame, name)?.is_none() {
                if let Some(value) = default.resolve(scope, frame)? {
                    let text = match value {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    scope.bind(frame, name.clone(), Binding::Value(text));
                }
            }
        }
        self.request.declare(scope, frame)
    }

    /// The scope label this endpoint's secrets are filed under, derived
    /// from its configuration name.
    #[must_use]
    pub fn secret_scope(&self) -> ScopeLabel {
        ScopeLabel(format!("endpoint:{}", self.configuration.name.as_deref().unwrap_or("_")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_default_resolves_directly() {
        let default = Default::Literal(serde_json::json!("localhost"));
        let scope = EvaluationScope::new();
        assert_eq!(
            default.resolve(&scope, scope.root()).unwrap(),
            Some(serde_json::json!("localhost"))
        );
    }

    #[test]
    fn discriminator_selects_branch_by_scope_value() {
        let yaml: serde_yaml::Value = serde_yaml::from_str(
            "env:\n  prod: api.example.com\n  stage: api.stage.example.com\n  default: localhost\n",
        )
        .unwrap();
        let default = Default::from_yaml(&yaml);
        let scope = EvaluationScope::new();
        scope.bind(scope.root(), "env", Binding::Value("stage".to_string()));
        assert_eq!(
            default.resolve(&scope, scope.root()).unwrap(),
            Some(serde_json::json!("api.stage.example.com"))
        );
    }

    #[test]
    fn discriminator_falls_back_to_default_branch() {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str("env:\n  prod: api.example.com\n  default: localhost\n").unwrap();
        let default = Default::from_yaml(&yaml);
        let scope = EvaluationScope::new();
        assert_eq!(default.resolve(&scope, scope.root()).unwrap(), Some(serde_json::json!("localhost")));
    }
}
