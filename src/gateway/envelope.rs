//! Response envelope shared by every endpoint.
//!
//! Success: `{"success": true, "data": ...}`. Errors:
//! `{"success": false, "error": {"code", "message", "details"?}}` with the
//! HTTP status derived from the error code.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{ErrorCode, NexusError};

pub fn success<T: Serialize>(data: T) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

pub fn error_response(code: ErrorCode, message: &str, details: Option<Value>) -> Response {
    let mut error = json!({
        "code": code.as_str(),
        "message": message,
    });
    if let Some(details) = details {
        error["details"] = details;
    }
    let status =
        StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(json!({ "success": false, "error": error }))).into_response()
}

/// Adapter so handlers can use `?` on `NexusResult`.
pub struct ApiError(pub NexusError);

impl From<NexusError> for ApiError {
    fn from(e: NexusError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let details = match &self.0 {
            NexusError::Validation { issues, .. } if !issues.is_empty() => {
                Some(json!({ "issues": issues }))
            }
            NexusError::UnknownTools { ids } => Some(json!({ "unknownTools": ids })),
            _ => None,
        };
        error_response(code, &self.0.to_string(), details)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// ─── Tests ───────────────────────────────────────────────────────────────────
