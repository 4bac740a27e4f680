use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use diesel_async::pooled_connection::PoolError;
use serde::Serialize;
use shared::{ErrorKind, OrderError};
use thiserror::Error;
use uuid::Uuid;

use crate::processor::ProcessorError;
use crate::webhook::SignatureError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] OrderError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("menu item {0} is not available at this restaurant")]
    MenuItemUnavailable(Uuid),

    #[error("restaurant {0} has not enabled online payments")]
    PaymentsNotEnabled(Uuid),

    #[error("payment processor error: {0}")]
    Processor(#[from] ProcessorError),

    #[error("invalid webhook signature: {0}")]
    Signature(#[from] SignatureError),

    #[error("missing or invalid staff credentials")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("stored record is inconsistent: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ServiceError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        ServiceError::NotFound { entity, id }
    }

    pub fn corrupt(err: impl std::fmt::Display) -> Self {
        ServiceError::Corrupt(err.to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Domain(err) => match err.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict | ErrorKind::Transition => StatusCode::CONFLICT,
            },
            ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::MenuItemUnavailable(_) | ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::PaymentsNotEnabled(_) => StatusCode::CONFLICT,
            ServiceError::Processor(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Signature(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServiceError::Database(_)
            | ServiceError::Pool(_)
            | ServiceError::Corrupt(_)
            | ServiceError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<bb8::RunError<PoolError>> for ServiceError {
    fn from(err: bb8::RunError<PoolError>) -> Self {
        ServiceError::Pool(err.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::warn!("Request rejected ({}): {}", status, self);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
