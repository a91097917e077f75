//! HTTP mapping of [`LoreError`]

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};

use crate::error::LoreError;

impl LoreError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            LoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            LoreError::Conflict { .. } => StatusCode::CONFLICT,
            LoreError::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {self}");
        } else {
            tracing::debug!(kind = self.kind(), "Request rejected: {self}");
        }

        let mut error = Map::new();
        error.insert("kind".to_string(), json!(self.kind()));
        error.insert("message".to_string(), json!(self.to_string()));
        if let Some((resource, id)) = self.subject() {
            error.insert("resource".to_string(), json!(resource));
            error.insert("id".to_string(), json!(id));
        }

        (status, Json(json!({ "error": Value::Object(error) }))).into_response()
    }
}
