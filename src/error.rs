//! Typed errors for the pipeline core, mapped to HTTP status codes at the
//! transport boundary.
//!
//! Stage functions return `anyhow::Result` for everyday glue and propagate
//! into one of these variants only where spec.md names a specific error
//! kind (input shape, missing prerequisite artifact, configuration). Any
//! other error surfaces as `AppError::Unexpected` (500).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    /// Request body is not one of the accepted shapes, or an array element
    /// is not an object.
    InputShape(String),
    /// A prerequisite stage artifact is missing from the working directory.
    MissingArtifact(String),
    /// An activity's inferred type has no entry in a required table.
    Config(String),
    /// Anything else — surfaced with the underlying message.
    Unexpected(anyhow::Error),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::InputShape(msg) => write!(f, "{msg}"),
            AppError::MissingArtifact(msg) => write!(f, "{msg}"),
            AppError::Config(msg) => write!(f, "{msg}"),
            AppError::Unexpected(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Unexpected(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::InputShape(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::MissingArtifact(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Config(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Unexpected(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
