use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::services::ledger::LedgerError;

/// Reason code attached to 410 Gone responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoneReason {
    FileNotActive,
    FileExpired,
    ViewLimitReached,
    AlreadyDeleted,
}

impl GoneReason {
    pub fn code(&self) -> &'static str {
        match self {
            GoneReason::FileNotActive => "FILE_NOT_ACTIVE",
            GoneReason::FileExpired => "FILE_EXPIRED",
            GoneReason::ViewLimitReached => "VIEW_LIMIT_REACHED",
            GoneReason::AlreadyDeleted => "ALREADY_DELETED",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            GoneReason::FileNotActive => "File is no longer active",
            GoneReason::FileExpired => "File has expired",
            GoneReason::ViewLimitReached => "View limit reached",
            GoneReason::AlreadyDeleted => "File already deleted",
        }
    }
}

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Record exists but its blob is missing from storage.
    #[error("File data not found in storage")]
    BlobMissing,

    #[error("Gone: {}", .0.code())]
    Gone(GoneReason),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Store contention that survived the bounded internal retries.
    #[error("Store busy: {0}")]
    Busy(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
}

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            reason: None,
            data: Some(data),
        }
    }

    pub fn success_message(message: &str) -> ApiResponse<()> {
        ApiResponse {
            code: 0,
            message: message.to_string(),
            reason: None,
            data: None,
        }
    }

    pub fn error(code: i32, message: &str, reason: Option<&'static str>) -> ApiResponse<()> {
        ApiResponse {
            code,
            message: message.to_string(),
            reason,
            data: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message, reason) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    500,
                    "Database error".to_string(),
                    None,
                )
            }
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, 400, msg.clone(), None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, 404, msg.clone(), None),
            AppError::BlobMissing => (
                StatusCode::NOT_FOUND,
                404,
                "File data not found in storage".to_string(),
                Some("FILE_NOT_FOUND_ON_DISK"),
            ),
            AppError::Gone(r) => (
                StatusCode::GONE,
                410,
                r.message().to_string(),
                Some(r.code()),
            ),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, 403, msg.clone(), None),
            AppError::Ledger(e) => {
                tracing::error!("Ledger error: {}", e);
                (
                    StatusCode::BAD_GATEWAY,
                    502,
                    "Ledger anchoring failed".to_string(),
                    None,
                )
            }
            AppError::Busy(msg) => {
                tracing::warn!("Store busy: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    503,
                    "Service busy, retry shortly".to_string(),
                    None,
                )
            }
            AppError::Storage(msg) => {
                tracing::error!("Storage error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, msg.clone(), None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, msg.clone(), None)
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    500,
                    "IO error".to_string(),
                    None,
                )
            }
            AppError::Request(e) => {
                tracing::error!("Request error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    500,
                    "External request error".to_string(),
                    None,
                )
            }
        };

        let body = Json(ApiResponse::<()>::error(code, &message, reason));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
