//! Store registry for resolving object stores by kind.

use std::collections::HashMap;
use std::sync::Arc;
use serde_json::Value;

use bucketsync_common::{BucketId, Error, Result};
use crate::provider::ObjectStore;

/// Factory function type for creating stores.
///
/// Receives the target bucket and the kind-specific options.
pub type StoreFactory =
    Box<dyn Fn(&BucketId, &Value) -> Result<Arc<dyn ObjectStore>> + Send + Sync>;

/// Registry for object store factories.
///
/// Allows dynamic registration and resolution of stores by kind name
/// and configuration.
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a store factory.
    ///
    /// # Errors
    /// - Returns error if `kind` is already registered
    pub fn register(&mut self, kind: impl Into<String>, factory: StoreFactory) -> Result<()> {
        let kind = kind.into();
        if self.factories.contains_key(&kind) {
            return Err(Error::AlreadyExists(format!(
                "Store '{}' is already registered",
                kind
            )));
        }
        self.factories.insert(kind, factory);
        Ok(())
    }

    /// Resolve a store by kind and options.
    ///
    /// # Errors
    /// - Configuration error if the kind is unknown or the options are invalid
    pub fn resolve(
        &self,
        kind: &str,
        bucket: &BucketId,
        options: &Value,
    ) -> Result<Arc<dyn ObjectStore>> {
        let factory = self.factories.get(kind).ok_or_else(|| {
            Error::Config(format!(
                "Store '{}' is not registered (available: {})",
                kind,
                self.kinds().join(", ")
            ))
        })?;
        factory(bucket, options)
    }

    /// Get registered store kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the built-in stores.
///
/// - `memory`: no options; optional `page_size`
/// - `local`: requires `root`; optional `page_size`
pub fn create_default_registry() -> StoreRegistry {
    let mut registry = StoreRegistry::new();

    registry.factories.insert(
        "memory".to_string(),
        Box::new(|bucket: &BucketId, options: &Value| -> Result<Arc<dyn ObjectStore>> {
            let mut store = crate::memory::MemoryStore::new(bucket.as_str());
            if let Some(size) = page_size(options)? {
                store = store.with_page_size(size);
            }
            Ok(Arc::new(store))
        }),
    );

    registry.factories.insert(
        "local".to_string(),
        Box::new(|bucket: &BucketId, options: &Value| -> Result<Arc<dyn ObjectStore>> {
            let root = options
                .get("root")
                .and_then(|v| v.as_str())
                .ok_or_else(|| Error::Config("Local store requires a 'root' path".to_string()))?;
            let mut store = crate::local::LocalStore::new(bucket.as_str(), root)?;
            if let Some(size) = page_size(options)? {
                store = store.with_page_size(size);
            }
            Ok(Arc::new(store))
        }),
    );

    registry
}

fn page_size(options: &Value) -> Result<Option<usize>> {
    match options.get("page_size") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .filter(|n| *n > 0)
            .map(|n| Some(n as usize))
            .ok_or_else(|| Error::Config(format!("Invalid page_size: {}", v))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use tempfile::TempDir;

    fn memory_factory() -> StoreFactory {
        Box::new(|b: &BucketId, _: &Value| -> Result<Arc<dyn ObjectStore>> {
            Ok(Arc::new(MemoryStore::new(b.as_str())))
        })
    }

    fn bucket() -> BucketId {
        BucketId::new("test-bucket").unwrap()
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = StoreRegistry::new();

        registry
            .register("test", memory_factory())
            .unwrap();

        let store = registry.resolve("test", &bucket(), &Value::Null).unwrap();
        assert_eq!(store.name(), "memory");
        assert_eq!(store.bucket(), "test-bucket");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = create_default_registry();
        let result = registry.register("memory", memory_factory());
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_unknown_is_config_error() {
        let registry = create_default_registry();
        let err = registry.resolve("s3", &bucket(), &Value::Null).err().unwrap();
        assert!(err.is_config());
    }

    #[test]
    fn test_local_requires_root() {
        let registry = create_default_registry();
        let err = registry.resolve("local", &bucket(), &serde_json::json!({})).err().unwrap();
        assert!(err.is_config());
    }

    #[test]
    fn test_local_with_root() {
        let temp = TempDir::new().unwrap();
        let registry = create_default_registry();
        let options = serde_json::json!({ "root": temp.path().to_string_lossy(), "page_size": 50 });
        let store = registry.resolve("local", &bucket(), &options).unwrap();
        assert_eq!(store.name(), "local");
    }

    #[test]
    fn test_invalid_page_size() {
        let registry = create_default_registry();
        let err = registry
            .resolve("memory", &bucket(), &serde_json::json!({ "page_size": 0 }))
            .err()
            .unwrap();
        assert!(err.is_config());
    }
}
