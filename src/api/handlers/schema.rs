use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use std::collections::BTreeMap;

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::SchemaRefreshResponse;

/// Cached schema text per store plus the aggregated block sent to generation
pub async fn get_schemas(State(state): State<AppState>) -> Json<serde_json::Value> {
    let schemas: BTreeMap<String, String> = state.schemas.cache().get_all().into_iter().collect();

    Json(serde_json::json!({
        "schemas": schemas,
        "aggregated": state.schemas.aggregated_schema(),
    }))
}

/// Re-introspect every registered store
pub async fn refresh_schemas(State(state): State<AppState>) -> Json<SchemaRefreshResponse> {
    let report = state.schemas.introspect_all().await;

    Json(SchemaRefreshResponse {
        refreshed: report.refreshed,
        failed: report.failed,
        refreshed_at: Utc::now(),
    })
}

/// Re-introspect one store
pub async fn refresh_schema(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let store = state
        .registry
        .get(&name)
        .ok_or_else(|| AppError::NotFound(format!("Store {} not found", name)))?;

    let schema = state.schemas.introspect(&store).await?;

    Ok(Json(serde_json::json!({
        "store": name,
        "schema": schema,
    })))
}

/// Drop one store's cached schema so the next access re-introspects it
pub async fn evict_schema(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if state.registry.get(&name).is_none() {
        return Err(AppError::NotFound(format!("Store {} not found", name)));
    }
    let evicted = state.schemas.cache().remove(&name);

    Ok(Json(serde_json::json!({
        "store": name,
        "evicted": evicted,
    })))
}

/// Drop every cached schema; the next access re-introspects
pub async fn clear_schemas(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cache = state.schemas.cache();
    let cleared = cache.size();
    cache.clear();

    Json(serde_json::json!({ "cleared": cleared }))
}
