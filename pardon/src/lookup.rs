//! Bridges an [`EvaluationScope`] and a [`ScriptEnvironment`] into the
//! [`Lookup`] trait consumed by [`pardon_core::Pattern::render`], resolving
//! plain holes from scope and expression holes by evaluating through the
//! host, in the order the expression's free identifiers first appear
//! (spec.md §5, "Ordering").

use pardon_core::scope::{EvaluationScope, FrameId};
use pardon_core::{Lookup, PardonError};

use crate::expression::{Expression, ScriptEnvironment};

pub struct EngineLookup<'a> {
    pub scope: &'a EvaluationScope,
    pub frame: FrameId,
    pub environment: &'a dyn ScriptEnvironment,
}

impl Lookup for EngineLookup<'_> {
    fn lookup(&self, name: &str) -> Option<String> {
        if let Some(stripped) = name.strip_prefix("secrets.") {
            return self.environment.secret(stripped);
        }
        self.scope.resolve_path(self.frame, name).ok().flatten()
    }

    fn evaluate(&self, expression: &str) -> Result<Option<String>, PardonError> {
        let lowered = Expression::lower(expression);
        let mut values = Vec::with_capacity(lowered.free_identifiers.len());
        for identifier in &lowered.free_identifiers {
            values.push(self.lookup(identifier));
        }
        let result = self.environment.evaluate(&lowered, &values)?;
        if let Some(value) = &result {
            self.scope.cache(self.frame, expression, value.clone());
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::MapScriptEnvironment;
    use pardon_core::scope::Binding;
    use pardon_core::Pattern;

    #[test]
    fn resolves_computed_field_through_environment() {
        let scope = EvaluationScope::new();
        scope.bind(scope.root(), "name", Binding::Value("Acme".to_string()));
        let environment = MapScriptEnvironment::new();
        let lookup = EngineLookup {
            scope: &scope,
            frame: scope.root(),
            environment: &environment,
        };
        let pattern = Pattern::parse("{{= name.toLowerCase() }}").unwrap();
        assert_eq!(pattern.render(&lookup).unwrap().as_deref(), Some("acme"));
    }
}
