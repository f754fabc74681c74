use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{detail}")]
    Rejected { status: StatusCode, detail: String },
    #[error("failed to load model: {0}")]
    ModelLoad(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("model execution failed: {0}")]
    Inference(String),
    #[error("Service unhealthy: {0}")]
    Unhealthy(String),
    #[error("Generation failed: {0}")]
    GenerationFailed(String),
    #[error("download failed: {0}")]
    Download(String),
    #[error("Failed to read logs: {0}")]
    LogRead(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match self {
            ServiceError::Rejected { status, .. } => status,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "detail": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        ServiceError::Rejected {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ServiceError {
    fn from(rejection: QueryRejection) -> Self {
        ServiceError::Rejected {
            status: rejection.status(),
            detail: rejection.body_text(),
        }
    }
}
