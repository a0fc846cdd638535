//! Immutable registry of scripting environments.

use super::{EcmaEnvironment, REnvironment, ScriptEnvironment};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Environments keyed by lower-cased name and alias.
///
/// Built once with [`RegistryBuilder`] and never mutated afterwards, so it can
/// be shared freely between concurrent runs.
#[derive(Clone)]
pub struct EnvironmentRegistry {
    environments: Vec<Arc<dyn ScriptEnvironment>>,
    by_name: HashMap<String, usize>,
}

impl EnvironmentRegistry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look an environment up by name or alias, ignoring case and
    /// surrounding whitespace.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn ScriptEnvironment>> {
        self.by_name
            .get(&name.trim().to_ascii_lowercase())
            .map(|&i| &self.environments[i])
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Canonical names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.environments.iter().map(|e| e.name()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.environments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }
}

impl fmt::Debug for EnvironmentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvironmentRegistry")
            .field("environments", &self.names())
            .finish()
    }
}

/// Collects environments before freezing them into a registry.
#[derive(Default)]
pub struct RegistryBuilder {
    environments: Vec<Arc<dyn ScriptEnvironment>>,
}

impl RegistryBuilder {
    /// Register an environment. A later registration wins when names or
    /// aliases collide.
    #[must_use]
    pub fn register(mut self, environment: impl ScriptEnvironment + 'static) -> Self {
        self.environments.push(Arc::new(environment));
        self
    }

    #[must_use]
    pub fn build(self) -> EnvironmentRegistry {
        let mut by_name = HashMap::new();
        for (index, environment) in self.environments.iter().enumerate() {
            let names = std::iter::once(environment.name()).chain(environment.aliases().iter().copied());
            for name in names {
                if let Some(previous) = by_name.insert(name.to_ascii_lowercase(), index) {
                    tracing::debug!(
                        environment = name,
                        replaced = self.environments[previous].name(),
                        "environment name registered twice"
                    );
                }
            }
        }
        EnvironmentRegistry {
            environments: self.environments,
            by_name,
        }
    }
}

/// The process-wide registry holding the bundled `ecma` and `r`
/// environments.
pub fn default_registry() -> Arc<EnvironmentRegistry> {
    static REGISTRY: OnceLock<Arc<EnvironmentRegistry>> = OnceLock::new();
    Arc::clone(REGISTRY.get_or_init(|| {
        Arc::new(
            EnvironmentRegistry::builder()
                .register(EcmaEnvironment)
                .register(REnvironment)
                .build(),
        )
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Bindings;
    use crate::script::{Budget, Evaluation, ScriptError};

    struct Fixed;

    impl ScriptEnvironment for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn aliases(&self) -> &'static [&'static str] {
            &["js"]
        }

        fn evaluate(&self, _: &str, _: &Bindings, _: &Budget) -> Result<Evaluation, ScriptError> {
            Ok(Evaluation::default())
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = default_registry();
        assert_eq!(registry.get("JavaScript").map(|e| e.name()), Some("ecma"));
        assert_eq!(registry.get(" R ").map(|e| e.name()), Some("r"));
        assert_eq!(registry.get("Renjin").map(|e| e.name()), Some("r"));
        assert!(registry.get("python").is_none());
        assert_eq!(registry.names(), vec!["ecma", "r"]);
    }

    #[test]
    fn test_later_registration_wins() {
        let registry = EnvironmentRegistry::builder()
            .register(EcmaEnvironment)
            .register(Fixed)
            .build();
        assert_eq!(registry.get("js").map(|e| e.name()), Some("fixed"));
        assert_eq!(registry.get("ecma").map(|e| e.name()), Some("ecma"));
        assert_eq!(registry.len(), 2);
    }
}
