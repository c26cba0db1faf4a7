// Schema text cache
//
// Process-lifetime map from store name to its last introspected schema text.
// No TTL and no eviction: entries only change through put/remove/clear.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Concurrent store-name -> schema-text cache
#[derive(Debug, Default)]
pub struct SchemaCache {
    entries: RwLock<HashMap<String, String>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store schema text for a store. Empty names are ignored.
    pub fn put(&self, name: &str, schema: impl Into<String>) {
        if name.is_empty() {
            return;
        }

        let schema = schema.into();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        tracing::debug!("Caching schema for {} ({} bytes)", name, schema.len());
        entries.insert(name.to_string(), schema);
    }

    /// Cached schema text, if any
    pub fn get(&self, name: &str) -> Option<String> {
        if name.is_empty() {
            return None;
        }

        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(name)
    }

    /// Independent snapshot of every entry
    pub fn get_all(&self) -> HashMap<String, String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.clone()
    }

    /// Drop one entry so the next access re-introspects the store
    pub fn remove(&self, name: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(name).is_some()
    }

    /// Empty the cache in one step
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let count = entries.len();
        *entries = HashMap::new();
        tracing::info!("Cleared {} cached schemas", count);
    }

    pub fn size(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.len()
    }
}
