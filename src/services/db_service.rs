use anyhow::{bail, Context};
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::models::{mask_credentials, StoreDescriptor, StoreEngine};
use crate::services::database::{DocumentConnections, SqlConnections};
use crate::services::store_registry::StoreRegistry;

/// Opens adapter connections for configured stores and registers them
pub struct StoreConnector {
    registry: Arc<StoreRegistry>,
    relational: Arc<SqlConnections>,
    documents: Arc<DocumentConnections>,
}

impl StoreConnector {
    pub fn new(
        registry: Arc<StoreRegistry>,
        relational: Arc<SqlConnections>,
        documents: Arc<DocumentConnections>,
    ) -> Self {
        Self {
            registry,
            relational,
            documents,
        }
    }

    /// Connect one store and register its descriptor
    pub async fn connect(&self, store: &StoreConfig) -> anyhow::Result<StoreDescriptor> {
        let kind = store.engine.kind();
        if let Some(declared) = store.kind {
            if declared != kind {
                bail!(
                    "Store {} declares kind {} but engine {} is {}",
                    store.name,
                    declared,
                    store.engine.as_str(),
                    kind
                );
            }
        }
        if let Some(existing) = self.registry.get(&store.name) {
            if existing.kind != kind {
                bail!(
                    "Store {} is already registered as {}, cannot reconnect it as {}",
                    store.name,
                    existing.kind,
                    kind
                );
            }
        }

        tracing::info!(
            "Connecting {} store {}: {}",
            store.engine.as_str(),
            store.name,
            mask_credentials(&store.url)
        );

        let descriptor = match store.engine {
            StoreEngine::Postgres => {
                self.relational.attach_postgres(&store.name, &store.url).await?;
                StoreDescriptor::relational(&store.name, store.engine, &store.url)
            }
            StoreEngine::Sqlite => {
                self.relational.attach_sqlite(&store.name, &store.url)?;
                StoreDescriptor::relational(&store.name, store.engine, &store.url)
            }
            StoreEngine::Mongo => {
                let default_database = self.documents.attach_mongo(&store.name, &store.url).await?;
                let database = store
                    .database
                    .clone()
                    .or(default_database)
                    .unwrap_or_else(|| store.name.clone());
                StoreDescriptor::mongo(&store.name, &store.url, database)
            }
            StoreEngine::Memory => {
                let database = store.database.clone().unwrap_or_else(|| store.name.clone());
                let memory = self.documents.memory();
                memory.attach(&store.name, &database);
                if let Some(seed) = &store.seed {
                    memory
                        .load_seed_file(&store.name, &database, seed)
                        .with_context(|| format!("Failed to seed store {}", store.name))?;
                }
                StoreDescriptor::document(&store.name, &store.url, database)
            }
        };

        self.registry.register(descriptor.clone())?;
        tracing::info!("Registered {} store {}", descriptor.kind, descriptor.name);
        Ok(descriptor)
    }

    /// Connect every configured store. A store that fails is logged and
    /// skipped so the rest still come up.
    pub async fn connect_all(&self, stores: &[StoreConfig]) -> Vec<StoreDescriptor> {
        let mut connected = Vec::with_capacity(stores.len());
        for store in stores {
            match self.connect(store).await {
                Ok(descriptor) => connected.push(descriptor),
                Err(e) => tracing::error!("Failed to connect store {}: {:#}", store.name, e),
            }
        }
        connected
    }
}
