//! VFS and pipeline errors mapped to HTTP.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use kura_kernel::{PipelineCode, VfsError};

/// One wire-facing error: status, stable kind, offending path, message.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: String,
    pub path: String,
    pub message: String,
}

impl ApiError {
    /// Map a VFS (or carried pipeline) error. `request_path` backs the body
    /// when the error names no path of its own.
    pub fn from_vfs(err: VfsError, request_path: &str) -> Self {
        let status = match &err {
            VfsError::NotFound { .. } => StatusCode::NOT_FOUND,
            VfsError::NotADirectory { .. }
            | VfsError::IsADirectory { .. }
            | VfsError::NotEmpty { .. }
            | VfsError::Invalid { .. } => StatusCode::BAD_REQUEST,
            VfsError::AlreadyExists { .. } => StatusCode::CONFLICT,
            VfsError::ReadOnly { .. } => StatusCode::METHOD_NOT_ALLOWED,
            VfsError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
            VfsError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            VfsError::Pipeline(e) => match e.code {
                PipelineCode::ValidationError | PipelineCode::SchemaError => {
                    StatusCode::BAD_REQUEST
                }
                PipelineCode::InsufficientPermissions => StatusCode::FORBIDDEN,
                PipelineCode::SoftDeleteProtection | PipelineCode::HardDeleteProtection => {
                    StatusCode::METHOD_NOT_ALLOWED
                }
            },
        };
        let path = err.path().unwrap_or(request_path).to_string();
        Self {
            status,
            kind: err.kind().to_string(),
            path,
            message: err.to_string(),
        }
    }

    pub fn bad_request(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "EINVAL".to_string(),
            path: path.into(),
            message: message.into(),
        }
    }

    /// An unexpected failure: a generic 500 whose message is only included
    /// in development mode.
    pub fn internal(dev_mode: bool, path: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "EIO".to_string(),
            path: path.into(),
            message: if dev_mode {
                message.to_string()
            } else {
                "internal error".to_string()
            },
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}: {}", self.kind, self.path, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": self.kind,
                "path": self.path,
                "message": self.message,
            })),
        )
            .into_response()
    }
}
