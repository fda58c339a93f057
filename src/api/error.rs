//! API error taxonomy and the JSON `{"error": ...}` envelope.
//!
//! Internal causes are logged for operators and never echoed to clients;
//! token-service distinctions (malformed vs absent vs expired) are collapsed
//! before they cross the trust boundary.

use axum::{
    http::{header::WWW_AUTHENTICATE, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;
use tracing::error;

use crate::api::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("unable to process the request")]
    Validation(HashMap<&'static str, String>),
    #[error("invalid or missing authentication token")]
    InvalidToken,
    #[error("invalid authentication credentials")]
    InvalidCredentials,
    #[error("you must be authenticated to access this resource")]
    AuthenticationRequired,
    #[error("your user account must be activated to access this resource")]
    InactiveAccount,
    #[error("you do not have permission to access this resource")]
    NotPermitted,
    #[error("the requested resource could not be found")]
    NotFound,
    #[error("unable to update the record due to an edit conflict, please try again")]
    EditConflict,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("the server encountered a problem and could not process your request")]
    Internal(anyhow::Error),
}

impl ApiError {
    /// Single-field validation failure.
    #[must_use]
    pub fn field(field: &'static str, message: &str) -> Self {
        Self::Validation(HashMap::from([(field, message.to_string())]))
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InvalidToken | Self::InvalidCredentials | Self::AuthenticationRequired => {
                StatusCode::UNAUTHORIZED
            }
            Self::InactiveAccount | Self::NotPermitted => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::EditConflict => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RecordNotFound => Self::NotFound,
            StoreError::EditConflict => Self::EditConflict,
            other => Self::Internal(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(cause) = &self {
            // Operators get the cause; clients only see the generic message.
            error!("internal error: {cause:#}");
        }

        let status = self.status();
        let message = match &self {
            Self::Validation(fields) => json!(fields),
            other => json!(other.to_string()),
        };

        let mut response = (status, Json(json!({ "error": message }))).into_response();
        if matches!(self, Self::InvalidToken) {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
