//! Name-to-handler lookup, populated at startup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::resource::Resource;

/// Resource handlers keyed by the exact (case-sensitive) resource name the
/// host sends.
#[derive(Clone, Default)]
pub struct Registry {
    resources: HashMap<String, Arc<dyn Resource>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler, returning the one it replaced.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        resource: Arc<dyn Resource>,
    ) -> Option<Arc<dyn Resource>> {
        let name = name.into();
        let previous = self.resources.insert(name.clone(), resource);
        if previous.is_some() {
            tracing::warn!(resource = %name, "Replacing previously registered resource");
        } else {
            tracing::debug!(resource = %name, "Registered resource");
        }
        previous
    }

    pub fn with(mut self, name: impl Into<String>, resource: impl Resource) -> Self {
        self.register(name, Arc::new(resource));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Resource>> {
        self.resources.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.resources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("resources", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Arguments, ResourceContext, ResourceError, ResourceResult};

    struct Fixed(i32);

    #[async_trait::async_trait]
    impl Resource for Fixed {
        async fn verify(
            &self,
            _ctx: &ResourceContext,
            _args: Arguments,
        ) -> Result<ResourceResult, ResourceError> {
            Ok(ResourceResult::failed(self.0))
        }

        async fn apply(
            &self,
            _ctx: &ResourceContext,
            _args: Arguments,
        ) -> Result<ResourceResult, ResourceError> {
            Ok(ResourceResult::failed(self.0))
        }

        async fn query(
            &self,
            _ctx: &ResourceContext,
            _args: Arguments,
        ) -> Result<ResourceResult, ResourceError> {
            Ok(ResourceResult::failed(self.0))
        }
    }

    #[test]
    fn lookup_is_exact() {
        let registry = Registry::new().with("nxFile", Fixed(1));
        assert!(registry.contains("nxFile"));
        assert!(!registry.contains("nxfile"));
        assert!(registry.get("NXFILE").is_none());
    }

    #[test]
    fn register_returns_replaced_handler() {
        let mut registry = Registry::new();
        assert!(registry.register("A", Arc::new(Fixed(1))).is_none());
        assert!(registry.register("A", Arc::new(Fixed(2))).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn names_are_sorted() {
        let registry = Registry::new()
            .with("nxService", Fixed(0))
            .with("nxFile", Fixed(0))
            .with("nxUser", Fixed(0));
        assert_eq!(registry.names(), ["nxFile", "nxService", "nxUser"]);
        assert_eq!(
            format!("{registry:?}"),
            r#"Registry { resources: ["nxFile", "nxService", "nxUser"] }"#
        );
    }

    #[test]
    fn empty_registry() {
        let registry = Registry::default();
        assert!(registry.is_empty());
        assert!(registry.names().is_empty());
    }
}
