use futures::future::join_all;
use std::sync::Arc;

use crate::models::{SchemaRefreshFailure, StoreDescriptor, StoreKind};
use crate::services::database::{DocumentAdapter, RelationalAdapter};
use crate::services::schema_cache::SchemaCache;
use crate::services::store_registry::StoreRegistry;

/// Source of schema text for a store. Implementations may memoize.
#[async_trait::async_trait]
pub trait SchemaAccessor: Send + Sync {
    async fn get_schema(&self, store: &StoreDescriptor) -> anyhow::Result<String>;
}

/// Result of refreshing every registered store
#[derive(Debug, Default)]
pub struct IntrospectionReport {
    pub refreshed: Vec<String>,
    pub failed: Vec<SchemaRefreshFailure>,
}

impl IntrospectionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// First failure as an error, for callers that treat any failure as fatal
    pub fn into_result(self) -> anyhow::Result<Vec<String>> {
        match self.failed.into_iter().next() {
            Some(failure) => Err(anyhow::anyhow!(
                "failed to introspect {}: {}",
                failure.store,
                failure.error
            )),
            None => Ok(self.refreshed),
        }
    }
}

/// Schema accessor that reads through the schema cache and introspects the
/// store through its adapter on a miss
pub struct SchemaService {
    cache: Arc<SchemaCache>,
    registry: Arc<StoreRegistry>,
    relational: Arc<dyn RelationalAdapter>,
    document: Arc<dyn DocumentAdapter>,
}

impl SchemaService {
    pub fn new(
        cache: Arc<SchemaCache>,
        registry: Arc<StoreRegistry>,
        relational: Arc<dyn RelationalAdapter>,
        document: Arc<dyn DocumentAdapter>,
    ) -> Self {
        Self {
            cache,
            registry,
            relational,
            document,
        }
    }

    pub fn cache(&self) -> &Arc<SchemaCache> {
        &self.cache
    }

    /// Introspect a store now, bypassing and then refreshing the cache
    pub async fn introspect(&self, store: &StoreDescriptor) -> anyhow::Result<String> {
        let schema = match store.kind {
            StoreKind::Relational => self.relational.introspect(&store.name).await?,
            StoreKind::Document => {
                self.document
                    .introspect(&store.name, store.database_name())
                    .await?
            }
        };

        self.cache.put(&store.name, schema.clone());
        Ok(schema)
    }

    /// Refresh every registered store concurrently. Successful stores are
    /// cached even when others fail.
    pub async fn introspect_all(&self) -> IntrospectionReport {
        let stores = self.registry.list();
        let results = join_all(stores.iter().map(|store| async move {
            (store.name.clone(), self.introspect(store).await)
        }))
        .await;

        let mut report = IntrospectionReport::default();
        for (name, result) in results {
            match result {
                Ok(_) => report.refreshed.push(name),
                Err(e) => {
                    tracing::error!("Failed to introspect store {}: {:#}", name, e);
                    report.failed.push(SchemaRefreshFailure {
                        store: name,
                        error: format!("{:#}", e),
                    });
                }
            }
        }

        tracing::info!(
            "Introspected {} stores ({} failed)",
            report.refreshed.len(),
            report.failed.len()
        );
        report
    }

    /// Every cached schema as `# Database: <name>` blocks, sorted by store name
    pub fn aggregated_schema(&self) -> String {
        render_aggregated_schema(&self.cache)
    }
}

#[async_trait::async_trait]
impl SchemaAccessor for SchemaService {
    async fn get_schema(&self, store: &StoreDescriptor) -> anyhow::Result<String> {
        if let Some(schema) = self.cache.get(&store.name) {
            return Ok(schema);
        }

        tracing::debug!("Schema cache miss for {}, introspecting", store.name);
        self.introspect(store).await
    }
}

/// Render cached schemas as one prompt-ready text block
pub fn render_aggregated_schema(cache: &SchemaCache) -> String {
    let mut schemas: Vec<(String, String)> = cache.get_all().into_iter().collect();
    schemas.sort_by(|a, b| a.0.cmp(&b.0));

    let mut text = String::new();
    for (name, schema) in schemas {
        if schema.trim().is_empty() {
            continue;
        }
        text.push_str(&format!("# Database: {}\n{}\n\n", name, schema.trim_end()));
    }
    text.trim().to_string()
}
