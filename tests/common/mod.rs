#![allow(dead_code)]

use askdb_backend::models::{GenerationRequest, GenerationResult, StoreDescriptor, StoreEngine};
use askdb_backend::services::database::{MemoryDocumentStore, SqlConnections};
use askdb_backend::services::{
    AskPipeline, GenerationBackend, SchemaCache, SchemaService, StoreRegistry,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub const STUDENTS_SQL: &str = "
    CREATE TABLE students (id INTEGER PRIMARY KEY, name TEXT, age INTEGER);
    INSERT INTO students (name, age) VALUES ('Ada', 22), ('Linus', 19), ('Grace', 35);
";

/// Backend that answers known prompts with fixed text
#[derive(Default)]
pub struct CannedBackend {
    replies: HashMap<String, String>,
}

impl CannedBackend {
    pub fn reply(mut self, prompt: &str, text: &str) -> Self {
        self.replies.insert(prompt.to_string(), text.to_string());
        self
    }
}

#[async_trait::async_trait]
impl GenerationBackend for CannedBackend {
    fn name(&self) -> &str {
        "canned"
    }

    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<GenerationResult> {
        self.replies
            .get(&request.prompt)
            .map(|text| GenerationResult::new(text.clone(), "canned"))
            .ok_or_else(|| anyhow::anyhow!("no canned reply for {:?}", request.prompt))
    }
}

pub struct TestStores {
    pub registry: Arc<StoreRegistry>,
    pub cache: Arc<SchemaCache>,
    pub relational: Arc<SqlConnections>,
    pub documents: Arc<MemoryDocumentStore>,
    pub schemas: Arc<SchemaService>,
}

impl TestStores {
    /// `students_db` (SQLite) and `lms_db` (memory documents), introspected
    pub async fn new() -> Self {
        let registry = Arc::new(StoreRegistry::new());
        let cache = Arc::new(SchemaCache::new());

        let relational = Arc::new(SqlConnections::new());
        relational
            .attach_sqlite_in_memory("students_db", STUDENTS_SQL)
            .unwrap();
        registry
            .register(StoreDescriptor::relational("students_db", StoreEngine::Sqlite, ":memory:"))
            .unwrap();

        let documents = Arc::new(MemoryDocumentStore::new());
        documents.seed(
            "lms_db",
            "lms",
            "courses",
            vec![
                json!({"title": "Rust 101", "duration": 10}),
                json!({"title": "Async Deep Dive", "duration": 14}),
            ],
        );
        registry
            .register(StoreDescriptor::document("lms_db", "memory://lms", "lms"))
            .unwrap();

        let schemas = Arc::new(SchemaService::new(
            cache.clone(),
            registry.clone(),
            relational.clone(),
            documents.clone(),
        ));
        schemas.introspect_all().await.into_result().unwrap();

        Self {
            registry,
            cache,
            relational,
            documents,
            schemas,
        }
    }

    pub fn pipeline(&self) -> AskPipeline {
        AskPipeline::new(
            self.registry.clone(),
            self.cache.clone(),
            self.schemas.clone(),
            self.relational.clone(),
            self.documents.clone(),
        )
    }
}
