use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use sealchat_shared::error::{DeletionError, RelayError};
use sealchat_shared::protocol::{ErrorBody, ErrorCode};
use sealchat_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Missing or malformed user id header")]
    Unauthenticated,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Delete request signature is invalid")]
    SignatureInvalid,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServerError::NotFound("record".into()),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl From<RelayError> for ServerError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::AccessDenied(why) => ServerError::AccessDenied(why),
            RelayError::UnknownChat => ServerError::NotFound("chat".into()),
        }
    }
}

impl From<DeletionError> for ServerError {
    fn from(e: DeletionError) -> Self {
        match e {
            DeletionError::SignatureInvalid => ServerError::SignatureInvalid,
            DeletionError::NotSender => ServerError::AccessDenied(e.to_string()),
            DeletionError::Encoding(_) => ServerError::BadRequest(e.to_string()),
        }
    }
}

impl ServerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ServerError::Unauthenticated => ErrorCode::Unauthenticated,
            ServerError::AccessDenied(_) => ErrorCode::AccessDenied,
            ServerError::SignatureInvalid => ErrorCode::SignatureInvalid,
            ServerError::NotFound(_) => ErrorCode::NotFound,
            ServerError::BadRequest(_) => ErrorCode::BadRequest,
            ServerError::Internal(_) => ErrorCode::Internal,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::Unauthenticated => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::AccessDenied(_) => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::SignatureInvalid => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
            }
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = ErrorBody {
            error: message,
            code: Some(self.code()),
        };

        (status, axum::Json(body)).into_response()
    }
}
