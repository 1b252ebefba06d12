//! Error type shared by every handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use vdash_adapters::GatewayError;
use vdash_sync::{StoreError, SyncError};

#[derive(Debug, Error)]
pub enum ApiError {
    /// A required query parameter is missing.
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    /// A sync pass is already in progress.
    #[error("{0}")]
    Conflict(String),

    /// Error reply or transport failure from the remote API.
    #[error("{0}")]
    Remote(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Remote(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        }
        let body = ErrorBody {
            success: false,
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidArgument(msg) => Self::Validation(msg),
            other => Self::Remote(other.to_string()),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::AlreadyRunning => Self::Conflict(err.to_string()),
            SyncError::Roster(_) => Self::Remote(err.to_string()),
            SyncError::Io(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(format!("{err:#}"))
    }
}
