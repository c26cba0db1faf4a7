use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::{AskError, RouteError};

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Routing error: {0}")]
    Routing(String),

    #[error("Query rejected: {0}")]
    QueryRejected(String),

    #[error("LLM service error: {0}")]
    LlmService(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("VALIDATION_ERROR", msg),
            ),
            AppError::Routing(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail::new("ROUTING_ERROR", msg)
                    .with_details("No registered store matched the prompt. Try naming a table or collection."),
            ),
            AppError::QueryRejected(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorDetail::new("QUERY_REJECTED", msg),
            ),
            AppError::LlmService(msg) => {
                let enhanced_msg = if msg.contains("error sending request") || msg.contains("Failed to call") {
                    format!("{} Check LLM_PROVIDER and LLM_GATEWAY_URL.", msg)
                } else {
                    msg
                };
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorDetail::new("LLM_SERVICE_ERROR", enhanced_msg),
                )
            }
            AppError::Database(msg) => {
                let enhanced_msg = if msg.contains("no such table") || msg.contains("does not exist") {
                    format!("{} Try refreshing the schemas or check if the table name is correct.", msg)
                } else {
                    msg
                };
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorDetail::new("DATABASE_ERROR", enhanced_msg),
                )
            }
            AppError::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorDetail::new("SERVICE_UNAVAILABLE", msg),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorDetail::new("NOT_FOUND", msg),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("INTERNAL_ERROR", msg),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_detail,
        });

        (status, body).into_response()
    }
}

impl From<RouteError> for AppError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::EmptyPrompt => AppError::Validation(err.to_string()),
            RouteError::NoStoresRegistered => AppError::Unavailable(err.to_string()),
            RouteError::NoMatch { .. } => AppError::Routing(err.to_string()),
        }
    }
}

impl From<AskError> for AppError {
    fn from(err: AskError) -> Self {
        match err {
            AskError::EmptyInput => AppError::Validation(err.to_string()),
            AskError::SchemaNotReady | AskError::Cancelled { .. } => AppError::Unavailable(err.to_string()),
            AskError::Route(route) => route.into(),
            AskError::GenerationFailed { .. } => AppError::LlmService(err.to_string()),
            AskError::ValidationFailed { .. } | AskError::CollectionUnresolved { .. } => {
                AppError::QueryRejected(err.to_string())
            }
            AskError::ExecutionFailed { .. } => AppError::Database(err.to_string()),
        }
    }
}

/// Convert anyhow::Error to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}
