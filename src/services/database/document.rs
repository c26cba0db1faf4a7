use mongodb::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::models::ResultRecord;
use crate::services::database::{mongo, DocumentAdapter, MemoryDocumentStore};

enum DocumentBackend<'a> {
    Mongo(Client),
    Memory(&'a MemoryDocumentStore),
}

/// Document adapter over every attached document store. Stores attached
/// with a MongoDB client go to that deployment; the rest are served by the
/// in-process store.
pub struct DocumentConnections {
    memory: Arc<MemoryDocumentStore>,
    mongo: RwLock<HashMap<String, Client>>,
}

impl DocumentConnections {
    pub fn new(memory: Arc<MemoryDocumentStore>) -> Self {
        Self {
            memory,
            mongo: RwLock::new(HashMap::new()),
        }
    }

    pub fn memory(&self) -> &Arc<MemoryDocumentStore> {
        &self.memory
    }

    /// Connect a MongoDB store. Returns the default database named in the
    /// connection string, if any.
    pub async fn attach_mongo(&self, store: &str, uri: &str) -> anyhow::Result<Option<String>> {
        let client = mongo::connect(uri).await?;
        let default_database = client.default_database().map(|db| db.name().to_string());

        let mut clients = self.mongo.write().unwrap_or_else(PoisonError::into_inner);
        clients.insert(store.to_string(), client);
        Ok(default_database)
    }

    pub fn is_mongo(&self, store: &str) -> bool {
        let clients = self.mongo.read().unwrap_or_else(PoisonError::into_inner);
        clients.contains_key(store)
    }

    fn backend(&self, store: &str) -> DocumentBackend<'_> {
        let clients = self.mongo.read().unwrap_or_else(PoisonError::into_inner);
        match clients.get(store) {
            Some(client) => DocumentBackend::Mongo(client.clone()),
            None => DocumentBackend::Memory(&self.memory),
        }
    }
}

#[async_trait::async_trait]
impl DocumentAdapter for DocumentConnections {
    async fn find(
        &self,
        store: &str,
        database: &str,
        collection: &str,
        filter: &Value,
    ) -> anyhow::Result<Vec<ResultRecord>> {
        match self.backend(store) {
            DocumentBackend::Mongo(client) => mongo::find(&client, database, collection, filter).await,
            DocumentBackend::Memory(memory) => memory.find(store, database, collection, filter).await,
        }
    }

    async fn insert(
        &self,
        store: &str,
        database: &str,
        collection: &str,
        document: &Value,
    ) -> anyhow::Result<Vec<ResultRecord>> {
        match self.backend(store) {
            DocumentBackend::Mongo(client) => mongo::insert(&client, database, collection, document).await,
            DocumentBackend::Memory(memory) => memory.insert(store, database, collection, document).await,
        }
    }

    async fn update(
        &self,
        store: &str,
        database: &str,
        collection: &str,
        filter: &Value,
        update: &Value,
    ) -> anyhow::Result<Vec<ResultRecord>> {
        match self.backend(store) {
            DocumentBackend::Mongo(client) => {
                mongo::update(&client, database, collection, filter, update).await
            }
            DocumentBackend::Memory(memory) => {
                memory.update(store, database, collection, filter, update).await
            }
        }
    }

    async fn delete(
        &self,
        store: &str,
        database: &str,
        collection: &str,
        filter: &Value,
    ) -> anyhow::Result<Vec<ResultRecord>> {
        match self.backend(store) {
            DocumentBackend::Mongo(client) => mongo::delete(&client, database, collection, filter).await,
            DocumentBackend::Memory(memory) => memory.delete(store, database, collection, filter).await,
        }
    }

    async fn aggregate(
        &self,
        store: &str,
        database: &str,
        collection: &str,
        pipeline: &[Value],
    ) -> anyhow::Result<Vec<ResultRecord>> {
        match self.backend(store) {
            DocumentBackend::Mongo(client) => {
                mongo::aggregate(&client, database, collection, pipeline).await
            }
            DocumentBackend::Memory(memory) => {
                memory.aggregate(store, database, collection, pipeline).await
            }
        }
    }

    async fn introspect(&self, store: &str, database: &str) -> anyhow::Result<String> {
        match self.backend(store) {
            DocumentBackend::Mongo(client) => mongo::introspect(&client, database).await,
            DocumentBackend::Memory(memory) => memory.introspect(store, database).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn connections() -> DocumentConnections {
        let memory = Arc::new(MemoryDocumentStore::new());
        memory.seed(
            "lms_db",
            "lms",
            "courses",
            vec![json!({"title": "Rust 101", "duration": 10})],
        );
        DocumentConnections::new(memory)
    }

    #[tokio::test]
    async fn test_unattached_mongo_store_falls_back_to_memory() {
        let docs = connections();
        assert!(!docs.is_mongo("lms_db"));

        let rows = docs.find("lms_db", "lms", "courses", &json!({})).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(docs.introspect("lms_db", "lms").await.unwrap().contains("courses("));
    }

    #[tokio::test]
    async fn test_attach_mongo_rejects_bad_uri() {
        let docs = connections();
        assert!(docs.attach_mongo("catalog", "http://localhost:27017").await.is_err());
        assert!(!docs.is_mongo("catalog"));
    }
}
