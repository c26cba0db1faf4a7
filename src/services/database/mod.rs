// Store adapters: execution and introspection per store kind
pub mod document;
pub mod memory_document;
pub mod mongo;
pub mod postgresql;
pub mod relational;
pub mod sqlite;

pub use document::DocumentConnections;
pub use memory_document::MemoryDocumentStore;
pub use relational::SqlConnections;

use crate::models::ResultRecord;
use serde_json::Value;

/// Execution contract for relational stores, addressed by store name
#[async_trait::async_trait]
pub trait RelationalAdapter: Send + Sync {
    /// Run a row-returning statement
    async fn read(&self, store: &str, query: &str) -> anyhow::Result<Vec<ResultRecord>>;

    /// Run a statement that modifies data and report the affected row count
    async fn write(&self, store: &str, command: &str) -> anyhow::Result<u64>;

    /// Render the store's tables as `table(column type, ...)` lines
    async fn introspect(&self, store: &str) -> anyhow::Result<String>;
}

/// Execution contract for document stores, addressed by store name and
/// logical database
#[async_trait::async_trait]
pub trait DocumentAdapter: Send + Sync {
    async fn find(
        &self,
        store: &str,
        database: &str,
        collection: &str,
        filter: &Value,
    ) -> anyhow::Result<Vec<ResultRecord>>;

    async fn insert(
        &self,
        store: &str,
        database: &str,
        collection: &str,
        document: &Value,
    ) -> anyhow::Result<Vec<ResultRecord>>;

    async fn update(
        &self,
        store: &str,
        database: &str,
        collection: &str,
        filter: &Value,
        update: &Value,
    ) -> anyhow::Result<Vec<ResultRecord>>;

    async fn delete(
        &self,
        store: &str,
        database: &str,
        collection: &str,
        filter: &Value,
    ) -> anyhow::Result<Vec<ResultRecord>>;

    async fn aggregate(
        &self,
        store: &str,
        database: &str,
        collection: &str,
        pipeline: &[Value],
    ) -> anyhow::Result<Vec<ResultRecord>>;

    /// Render the store's collections as `collection(field type, ...)` lines
    async fn introspect(&self, store: &str, database: &str) -> anyhow::Result<String>;
}
