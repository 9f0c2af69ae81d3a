//! Secret storage as a small capability object (spec.md §9, "Proxy-based
//! secrets object"): `lookup`/`bind`/`scoped` rather than a dynamic proxy.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use pardon_core::scope::ScopeLabel;

/// Values declared `@secret` (spec.md §3: "identifiers declared `@secret`
/// are stored in a parallel `secrets` table and never appear in rendered
/// output unless explicitly requested").
#[derive(Debug, Default, Clone)]
pub struct Secrets {
    values: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl Secrets {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a secret bound under `scope`/`name`.
    #[must_use]
    pub fn lookup(&self, scope: &ScopeLabel, name: &str) -> Option<String> {
        self.values.read().unwrap().get(&(scope.0.clone(), name.to_string())).cloned()
    }

    pub fn bind(&self, scope: &ScopeLabel, name: impl Into<String>, value: impl Into<String>) {
        self.values
            .write()
            .unwrap()
            .insert((scope.0.clone(), name.into()), value.into());
    }

    /// Returns a view of this table scoped to `scope`, so expression authors
    /// writing `secrets.foo` resolve against a fixed namespace (spec.md §9:
    /// "the host translates to `secrets.lookup(currentScope, "foo")`").
    #[must_use]
    pub fn scoped(&self, scope: ScopeLabel) -> ScopedSecrets {
        ScopedSecrets {
            secrets: self.clone(),
            scope,
        }
    }
}

/// A [`Secrets`] table fixed to one scope, exposing plain-name lookups.
pub struct ScopedSecrets {
    secrets: Secrets,
    scope: ScopeLabel,
}

impl ScopedSecrets {
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<String> {
        self.secrets.lookup(&self.scope, name)
    }

    pub fn bind(&self, name: impl Into<String>, value: impl Into<String>) {
        self.secrets.bind(&self.scope, name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_and_looks_up_by_scope_and_name() {
        let secrets = Secrets::new();
        let scope = ScopeLabel("endpoint:auth".to_string());
        secrets.bind(&scope, "token", "sek");
        assert_eq!(secrets.lookup(&scope, "token").as_deref(), Some("sek"));
    }

    #[test]
    fn scoped_view_resolves_plain_names() {
        let secrets = Secrets::new();
        let scope = ScopeLabel("endpoint:auth".to_string());
        secrets.bind(&scope, "token", "sek");
        let view = secrets.scoped(scope);
        assert_eq!(view.lookup("token").as_deref(), Some("sek"));
    }

    #[test]
    fn different_scopes_are_isolated() {
        let secrets = Secrets::new();
        secrets.bind(&ScopeLabel("a".to_string()), "token", "one");
        secrets.bind(&ScopeLabel("b".to_string()), "token", "two");
        assert_eq!(secrets.lookup(&ScopeLabel("a".to_string()), "token").as_deref(), Some("one"));
        assert_eq!(secrets.lookup(&ScopeLabel("b".to_string()), "token").as_deref(), Some("two"));
    }
}
