use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{ask, schema, store, AppState};
use crate::config::Config;
use crate::services::database::{DocumentConnections, MemoryDocumentStore, SqlConnections};
use crate::services::{
    create_backend, AskPipeline, SchemaCache, SchemaService, StoreConnector, StoreRegistry,
};
use crate::validation::QueryValidator;

/// Create router with application state
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/stores", get(store::list_stores))
        .route("/api/stores/{name}", get(store::get_store))
        .route(
            "/api/schemas",
            get(schema::get_schemas).delete(schema::clear_schemas),
        )
        .route("/api/schemas/refresh", post(schema::refresh_schemas))
        .route("/api/schemas/{name}", delete(schema::evict_schema))
        .route("/api/schemas/{name}/refresh", post(schema::refresh_schema))
        .route("/api/route", post(ask::route))
        .route("/api/ask", post(ask::ask))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Wire registry, adapters, schema service, generation backend and pipeline
/// from configuration. Stores that fail to connect or introspect are logged
/// and left out rather than aborting startup.
pub async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let registry = Arc::new(StoreRegistry::new());
    let cache = Arc::new(SchemaCache::new());
    let relational = Arc::new(
        SqlConnections::new()
            .with_statement_timeout(config.database.statement_timeout())
            .with_max_pool_size(config.database.max_pool_size),
    );
    let documents = Arc::new(DocumentConnections::new(Arc::new(MemoryDocumentStore::new())));

    let connector = StoreConnector::new(registry.clone(), relational.clone(), documents.clone());
    let connected = connector.connect_all(&config.stores).await;
    tracing::info!("{} of {} configured stores connected", connected.len(), config.stores.len());

    let schemas = Arc::new(SchemaService::new(
        cache.clone(),
        registry.clone(),
        relational.clone(),
        documents.clone(),
    ));
    let report = schemas.introspect_all().await;
    if !report.is_complete() {
        tracing::warn!("{} stores have no schema yet; refresh once they are reachable", report.failed.len());
    }

    let backend = create_backend(&config.llm)?;
    let validator = QueryValidator::new(config.validation.to_policy()?);
    let pipeline = AskPipeline::new(registry.clone(), cache, schemas.clone(), relational, documents)
        .with_validator(validator)
        .with_route_timeout(config.router.timeout());

    Ok(AppState {
        registry,
        schemas,
        pipeline: Arc::new(pipeline),
        backend,
    })
}
