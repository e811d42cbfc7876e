use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use harvester_common::error::Error;
use harvester_connector::PreviewError;
use serde_json::json;
use tracing::error;

/// Failure of a request, rendered as `{"error": ..., "code": ...}`.
#[derive(Debug)]
pub enum ApiError {
    Domain(Error),
    Preview(PreviewError),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Domain(err)
    }
}

impl From<PreviewError> for ApiError {
    fn from(err: PreviewError) -> Self {
        ApiError::Preview(err)
    }
}

pub(crate) fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::InvalidInput(_) | Error::InvalidCronExpression { .. } | Error::Serialization(_) => {
            StatusCode::BAD_REQUEST
        }
        Error::Conflict(_) | Error::TaskBusy { .. } => StatusCode::CONFLICT,
        Error::ChannelComm(_) | Error::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            ApiError::Domain(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    error!("API: request failed: {}", err);
                }
                (status, err.to_string(), err.kind())
            }
            ApiError::Preview(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                err.to_string(),
                err.reason(),
            ),
        };

        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}

pub(crate) type ApiResult<T> = Result<T, ApiError>;
