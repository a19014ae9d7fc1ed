use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::{export::ExportError, models::ErrorResponse};

/// Failures of the text/image generation collaborator.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("missing API credential")] MissingCredential,
    #[error("HTTP error: {0}")] Http(String),
    #[error("upstream returned status {status}: {body}")] Status { status: u16, body: String },
    #[error("parse error: {0}")] Parse(String),
    #[error("no {0} content in response")] NoContent(&'static str),
}

/// Errors surfaced to HTTP callers. Each variant maps to one status code.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("upstream generation failed: {0}")]
    Upstream(#[from] GenerationError),
    #[error("the model returned an empty ebook")]
    EmptyGeneration,
    #[error("export failed: {0}")]
    Export(#[from] ExportError),
    #[error("background task failed: {0}")]
    Task(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Upstream(_) | AppError::EmptyGeneration | AppError::Export(_) | AppError::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Terse message for the caller; upstream detail stays in the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::Upstream(_) => "Error generating the ebook. Check the server logs.".to_string(),
            AppError::Export(_) => format!("{self}. Try exporting again."),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "❌ request failed");
        } else {
            tracing::warn!(error = %self, %status, "request rejected");
        }
        let body = Json(ErrorResponse { error: self.public_message() });
        let mut response = (status, body).into_response();
        if matches!(self, AppError::MethodNotAllowed) {
            response.headers_mut().insert(header::ALLOW, HeaderValue::from_static("POST"));
        }
        response
    }
}
