use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

use crate::models::{StoreDescriptor, StoreKind};

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("Store name cannot be empty")]
    EmptyName,

    #[error("Store {name} is already registered as {existing}, cannot re-register as {requested}")]
    KindConflict {
        name: String,
        existing: StoreKind,
        requested: StoreKind,
    },
}

/// Store name -> descriptor. Populated by connection setup, read by routing.
#[derive(Debug, Default)]
pub struct StoreRegistry {
    stores: RwLock<HashMap<String, StoreDescriptor>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store. Re-registering a name keeps its kind and replaces
    /// the connection identity.
    pub fn register(&self, descriptor: StoreDescriptor) -> Result<(), RegistryError> {
        if descriptor.name.is_empty() {
            return Err(RegistryError::EmptyName);
        }

        let mut stores = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = stores.get(&descriptor.name) {
            if existing.kind != descriptor.kind {
                return Err(RegistryError::KindConflict {
                    name: descriptor.name.clone(),
                    existing: existing.kind,
                    requested: descriptor.kind,
                });
            }
        }

        tracing::info!(
            "Registered {} store {} ({})",
            descriptor.kind,
            descriptor.name,
            descriptor.connection.masked_url()
        );
        stores.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<StoreDescriptor> {
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        stores.get(name).cloned()
    }

    /// Snapshot of every store, sorted by name
    pub fn list(&self) -> Vec<StoreDescriptor> {
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<StoreDescriptor> = stores.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn len(&self) -> usize {
        let stores = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
