//! The YAML configuration block that precedes an `.https` file's steps
//! (spec.md §4.6: "A leading YAML block ... holds `configuration`").

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{self, HttpsError};

/// Parsed `config:`/`defaults:`/`import:`/`mixin:`/`flow:` header.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub name: Option<String>,
    pub service: Option<String>,
    pub action: Option<String>,
    /// Named config axes (e.g. `env: { prod: ..., stage: ... }`), resolved at
    /// runtime by the endpoint environment (spec.md §4.7).
    pub config: BTreeMap<String, serde_yaml::Value>,
    /// `defaults[name]`: a literal or a discriminator subtree (spec.md §4.4).
    pub defaults: BTreeMap<String, serde_yaml::Value>,
    /// `specifier → names` imported from the script host (spec.md §4.7).
    pub import: BTreeMap<String, Vec<String>>,
    /// Mixin file paths merged into every matching request.
    pub mixin: Vec<String>,
    /// Ordered flow step names, consumed by the external flow collaborator.
    pub flow: Vec<String>,
}

impl Configuration {
    /// Parses the YAML text preceding the first `>>>` marker. An empty or
    /// whitespace-only header parses to the default configuration.
    pub fn parse(yaml: &str) -> Result<Self, HttpsError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(|source| {
            error::ConfigCtx {
                message: format!("invalid configuration header: {source}"),
            }
            .build()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_empty_header_to_defaults() {
        let config = Configuration::parse("").unwrap();
        assert!(config.name.is_none());
        assert!(config.defaults.is_empty());
    }

    #[test]
    fn parses_name_and_defaults() {
        let yaml = "name: get-thing\ndefaults:\n  host: localhost\n";
        let config = Configuration::parse(yaml).unwrap();
        assert_eq!(config.name.as_deref(), Some("get-thing"));
        assert_eq!(config.defaults.get("host").and_then(|v| v.as_str()), Some("localhost"));
    }

    #[test]
    fn parses_import_map() {
        let yaml = "import:\n  ./helpers.js:\n    - slugify\n";
        let config = Configuration::parse(yaml).unwrap();
        assert_eq!(config.import.get("./helpers.js").map(Vec::as_slice), Some(&["slugify".to_string()][..]));
    }
}
