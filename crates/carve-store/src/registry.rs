//! Tag-indexed registry of storage backends.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::StoreError;
use crate::traits::StorageBackend;

/// Maps backend tags (as recorded on chunk records) to live backends.
///
/// Insertion order is preserved so distribution walks backends in the order
/// they were registered.
#[derive(Default)]
pub struct BackendRegistry {
    tags: Vec<String>,
    backends: HashMap<String, Arc<dyn StorageBackend>>,
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("tags", &self.tags)
            .finish()
    }
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its own tag, replacing any previous entry.
    pub fn register(&mut self, backend: Arc<dyn StorageBackend>) {
        let tag = backend.tag().to_string();
        if !self.backends.contains_key(&tag) {
            self.tags.push(tag.clone());
        }
        self.backends.insert(tag, backend);
    }

    /// Look up a backend by tag.
    pub fn resolve(&self, tag: &str) -> Result<Arc<dyn StorageBackend>, StoreError> {
        self.backends
            .get(tag)
            .cloned()
            .ok_or_else(|| StoreError::UnknownBackend(tag.to_string()))
    }

    /// All registered backends, in registration order.
    pub fn all(&self) -> Vec<Arc<dyn StorageBackend>> {
        self.tags
            .iter()
            .map(|tag| self.backends[tag].clone())
            .collect()
    }

    /// Registered tags, in registration order.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Number of registered backends.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Whether no backends are registered.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;

    #[test]
    fn test_resolve_registered_backend() {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(MemoryStore::new("mem")));

        let backend = registry.resolve("mem").unwrap();
        assert_eq!(backend.tag(), "mem");
    }

    #[test]
    fn test_resolve_unknown_tag_errors() {
        let registry = BackendRegistry::new();
        let result = registry.resolve("nope");
        assert!(matches!(result, Err(StoreError::UnknownBackend(tag)) if tag == "nope"));
    }

    #[test]
    fn test_all_preserves_registration_order() {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(MemoryStore::new("b")));
        registry.register(Arc::new(MemoryStore::new("a")));
        registry.register(Arc::new(MemoryStore::new("c")));

        let tags: Vec<_> = registry.all().iter().map(|b| b.tag().to_string()).collect();
        assert_eq!(tags, ["b", "a", "c"]);
    }

    #[test]
    fn test_register_same_tag_replaces() {
        let mut registry = BackendRegistry::new();
        registry.register(Arc::new(MemoryStore::new("mem")));
        registry.register(Arc::new(MemoryStore::new("mem")));
        assert_eq!(registry.len(), 1);
    }
}
