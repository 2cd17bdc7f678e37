//! Crate-wide error type with stable, caller-visible kinds.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Failures surfaced by the service.
///
/// Each variant maps to a stable kind string used in HTTP error bodies and
/// stream error events, and to an HTTP status for the non-streaming routes.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid repository url: {0}")]
    InvalidRepoUrl(String),

    #[error("no ingestion job found for {0}")]
    RepositoryNotFound(Uuid),

    #[error("repository {0} has no completed ingestion")]
    RepositoryNotReady(Uuid),

    #[error("clone failed: {0}")]
    CloneFailure(String),

    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    #[error("model generation error: {0}")]
    ModelGeneration(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("invalid request: {0}")]
    InvalidInput(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable kind name, shared by HTTP bodies and stream error events.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidRepoUrl(_) => "InvalidRepoUrl",
            Error::RepositoryNotFound(_) => "RepositoryNotFound",
            Error::RepositoryNotReady(_) => "RepositoryNotReady",
            Error::CloneFailure(_) => "CloneFailure",
            Error::EmbeddingService(_) => "EmbeddingServiceError",
            Error::ModelGeneration(_) => "ModelGenerationError",
            Error::Timeout(_) => "Timeout",
            Error::InvalidInput(_) => "InvalidInput",
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => "InternalError",
        }
    }

    /// Payload for a stream error event. Readiness and lookup failures
    /// carry the bare kind so clients can match on it; everything else
    /// keeps its detail.
    pub fn stream_message(&self) -> String {
        match self {
            Error::RepositoryNotReady(_) | Error::RepositoryNotFound(_) => self.kind().to_string(),
            other => other.to_string(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::InvalidRepoUrl(_) | Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::RepositoryNotFound(_) => StatusCode::NOT_FOUND,
            Error::RepositoryNotReady(_) => StatusCode::CONFLICT,
            Error::CloneFailure(_) | Error::EmbeddingService(_) | Error::ModelGeneration(_) => {
                StatusCode::BAD_GATEWAY
            }
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}
