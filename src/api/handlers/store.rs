use axum::{extract::{Path, State}, Json};

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{StoreListResponse, StoreSummary};

/// List all registered stores
pub async fn list_stores(State(state): State<AppState>) -> Json<StoreListResponse> {
    let cache = state.schemas.cache();
    let stores = state
        .registry
        .list()
        .iter()
        .map(|store| StoreSummary::from_descriptor(store, cache.contains(&store.name)))
        .collect();

    Json(StoreListResponse { stores })
}

/// Get one registered store
pub async fn get_store(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<StoreSummary>, AppError> {
    let store = state
        .registry
        .get(&name)
        .ok_or_else(|| AppError::NotFound(format!("Store {} not found", name)))?;

    Ok(Json(StoreSummary::from_descriptor(
        &store,
        state.schemas.cache().contains(&name),
    )))
}
