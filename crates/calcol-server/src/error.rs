//! Server error types and their HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use calcol::{CalcolError, ManagerError, ParseError};
use polars::prelude::PolarsError;
use thiserror::Error;

use crate::state::ErrorResponse;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Calcol(#[from] CalcolError),

    #[error("Failed to load data: {0}")]
    Polars(#[from] PolarsError),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<ManagerError> for ServerError {
    fn from(e: ManagerError) -> Self {
        ServerError::Calcol(e.into())
    }
}

impl From<ParseError> for ServerError {
    fn from(e: ParseError) -> Self {
        ServerError::Calcol(e.into())
    }
}

/// Application error type surfaced by handlers.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

impl From<ServerError> for AppError {
    fn from(e: ServerError) -> Self {
        let status = match &e {
            ServerError::Calcol(CalcolError::Manager(ManagerError::UnknownCalculation(_))) => {
                StatusCode::NOT_FOUND
            }
            ServerError::Calcol(CalcolError::Manager(
                ManagerError::DuplicateColumnName(_) | ManagerError::Cycle(_),
            )) => StatusCode::CONFLICT,
            ServerError::Calcol(_) => StatusCode::BAD_REQUEST,
            ServerError::Polars(_) | ServerError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}
