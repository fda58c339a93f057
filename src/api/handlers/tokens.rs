//! Authentication token issuance (login).

use crate::api::{
    error::ApiError,
    handlers::{normalize_email, valid_email},
    password,
    state::AppState,
    store::StoreError,
    tokens::{self, Scope},
};
use anyhow::anyhow;
use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

/// Bearer tokens live for a day.
const AUTHENTICATION_TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub email: String,
    pub password: SecretString,
}

/// Exchange email + password for a bearer token.
pub async fn create_authentication_token(
    Extension(state): Extension<AppState>,
    payload: Option<Json<CredentialsRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::BadRequest("Missing payload".to_string()));
    };

    let email = normalize_email(&request.email);
    let provided = request.password.expose_secret();

    let mut errors: HashMap<&'static str, String> = HashMap::new();
    if !valid_email(&email) {
        errors.insert("email", "must be a valid email address".to_string());
    }
    if provided.is_empty() {
        errors.insert("password", "must be provided".to_string());
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let (user, password_hash) = match state.store.user_by_email(&email).await {
        Ok(found) => found,
        // An unknown address and a wrong password are indistinguishable.
        Err(StoreError::RecordNotFound) => return Err(ApiError::InvalidCredentials),
        Err(err) => return Err(err.into()),
    };

    let matches = password::verify(provided, &password_hash)
        .map_err(|err| ApiError::Internal(anyhow!("failed to verify password: {err}")))?;
    if !matches {
        return Err(ApiError::InvalidCredentials);
    }

    let token = tokens::issue(
        state.store.as_ref(),
        user.id,
        Duration::hours(AUTHENTICATION_TOKEN_TTL_HOURS),
        Scope::Authentication,
    )
    .await
    .map_err(|err| ApiError::Internal(anyhow::Error::new(err)))?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "authentication_token": token })),
    ))
}
