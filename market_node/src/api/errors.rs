//! API error type and the mapping from access-control failures to HTTP
//! status codes.

use crate::ledger::LedgerError;
use crate::policy::AccessError;
use crate::storage::StorageError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::error;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: u16,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub timestamp: u64,
}

impl ApiError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            timestamp: chrono::Utc::now().timestamp() as u64,
        }
    }

    pub fn with_details(code: u16, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            details: Some(details),
            ..Self::new(code, message)
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(400, message)
    }

    pub fn unauthorized(message: &str) -> Self {
        Self::new(401, message)
    }

    pub fn forbidden(message: &str) -> Self {
        Self::new(403, message)
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(404, message)
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::with_details(
            413,
            "Upload too large",
            serde_json::json!({ "max_upload_bytes": limit }),
        )
    }

    pub fn unprocessable_entity(message: &str) -> Self {
        Self::new(422, message)
    }

    pub fn internal_server_error(message: &str) -> Self {
        Self::new(500, message)
    }

    pub fn service_unavailable(message: &str) -> Self {
        Self::new(503, message)
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "API Error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        match &err {
            AccessError::InvalidSignature => Self::unauthorized(&err.to_string()),
            AccessError::NotOwner => Self::forbidden(&err.to_string()),
            AccessError::KeyUnavailable { .. } | AccessError::NotFound(_) => Self::not_found(&err.to_string()),
            AccessError::InvalidInput(reason) => Self::bad_request(reason),
            AccessError::Integrity(_) => Self::unprocessable_entity(&err.to_string()),
            AccessError::Storage(StorageError::DuplicateItem { item_id, existing }) => Self::with_details(
                409,
                "Item is already bound to other content",
                serde_json::json!({ "item_id": item_id, "content_id": existing }),
            ),
            AccessError::Storage(inner) => {
                error!("Key storage failure: {}", inner);
                Self::internal_server_error("Key storage failure")
            }
            AccessError::Ledger(LedgerError::ItemNotFound(item_id)) => Self::with_details(
                404,
                "Item not found",
                serde_json::json!({ "item_id": item_id }),
            ),
            AccessError::Ledger(inner) => {
                error!("Ledger failure: {}", inner);
                Self::service_unavailable("Blockchain ledger unavailable")
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        AccessError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}
