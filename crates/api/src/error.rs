use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use extract::TimeoutError;
use index::{DimensionMismatchError, IndexError};
use query::QueryError;
use serde_json::json;
use tracing::error;

/// Error returned by a handler, already mapped to a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        let status = match &err {
            QueryError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            QueryError::Generation(_) => StatusCode::BAD_GATEWAY,
            QueryError::Index(IndexError::DimensionMismatch(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            QueryError::Index(_) | QueryError::Embedding(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        let status = if err.chain().any(|e| e.is::<TimeoutError>()) {
            StatusCode::GATEWAY_TIMEOUT
        } else if err.chain().any(|e| {
            e.is::<DimensionMismatchError>()
                || matches!(e.downcast_ref::<IndexError>(), Some(IndexError::DimensionMismatch(_)))
        }) {
            StatusCode::UNPROCESSABLE_ENTITY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::new(status, format!("{:#}", err))
    }
}

impl From<IndexError> for ApiError {
    fn from(err: IndexError) -> Self {
        anyhow::Error::new(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = self.status.as_u16(), error = %self.message, "Request failed");
        }
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
