//! Named transformations available to `use` stages by bare name.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use finch_types::Transform;

#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: BTreeMap<String, Arc<dyn Transform>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `transform` under `name`, replacing any previous entry.
    pub fn register<T>(&mut self, name: impl Into<String>, transform: T) -> &mut Self
    where
        T: Transform + 'static,
    {
        self.transforms.insert(name.into(), Arc::new(transform));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transform>> {
        self.transforms.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.transforms.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.transforms.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finch_types::{Invocation, TransformInput};

    #[test]
    fn register_and_lookup() {
        let mut registry = TransformRegistry::new();
        registry
            .register("identity", |input: TransformInput| {
                Invocation::value(input.value().clone())
            })
            .register("drop", |_input: TransformInput| Invocation::empty());

        assert!(registry.contains("identity"));
        assert!(registry.get("drop").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["drop", "identity"]);
        assert_eq!(format!("{registry:?}"), r#"{"drop", "identity"}"#);
    }
}
