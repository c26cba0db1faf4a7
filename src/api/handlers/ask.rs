use axum::{extract::State, Json};
use std::time::Instant;

use crate::api::handlers::AppState;
use crate::api::middleware::AppError;
use crate::models::{AskRequest, AskResponse, RouteRequest, RouteResponse};
use crate::services::CancelSignal;

/// Answer a natural-language prompt against the best-matching store
pub async fn ask(
    State(state): State<AppState>,
    Json(payload): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let prompt = payload.prompt.trim();
    if prompt.is_empty() {
        return Err(AppError::Validation("Prompt cannot be empty".to_string()));
    }

    let start = Instant::now();
    let outcome = state
        .pipeline
        .run(prompt, state.backend.as_ref(), &CancelSignal::new())
        .await?;
    let execution_time_ms = start.elapsed().as_millis() as u64;

    tracing::info!(
        "Ask answered by store {} in {}ms ({} rows)",
        outcome.store,
        execution_time_ms,
        outcome.rows.len()
    );

    Ok(Json(AskResponse::new(outcome, execution_time_ms)))
}

/// Report which store a prompt would be routed to, without generating anything
pub async fn route(
    State(state): State<AppState>,
    Json(payload): Json<RouteRequest>,
) -> Result<Json<RouteResponse>, AppError> {
    let decision = state.pipeline.router().route_with_details(&payload.prompt).await?;

    Ok(Json(RouteResponse {
        store: decision.store.name,
        kind: decision.store.kind,
        keywords: decision.keywords,
    }))
}
