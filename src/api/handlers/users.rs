//! User registration and activation.

use crate::api::{
    error::ApiError,
    handlers::{normalize_email, valid_email},
    password,
    state::AppState,
    store::StoreError,
    tokens::{self, Scope, TokenError},
};
use anyhow::anyhow;
use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

/// Activation links are good for a day.
const ACTIVATION_TOKEN_TTL_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: SecretString,
}

#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub token: String,
}

/// Create an account, grant the default read capability, and send the
/// activation token out of band.
pub async fn register(
    Extension(state): Extension<AppState>,
    payload: Option<Json<RegisterRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::BadRequest("Missing payload".to_string()));
    };

    let name = request.name.trim().to_string();
    let email = normalize_email(&request.email);
    let password = request.password.expose_secret();

    let mut errors: HashMap<&'static str, String> = HashMap::new();
    if name.is_empty() {
        errors.insert("name", "must be provided".to_string());
    }
    if !valid_email(&email) {
        errors.insert("email", "must be a valid email address".to_string());
    }
    if password.len() < 8 || password.len() > 72 {
        errors.insert("password", "must be between 8 and 72 bytes long".to_string());
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let password_hash = password::hash(password)
        .map_err(|err| ApiError::Internal(anyhow!("failed to hash password: {err}")))?;

    let user = match state.store.insert_user(&name, &email, &password_hash).await {
        Ok(user) => user,
        Err(StoreError::DuplicateEmail) => {
            return Err(ApiError::field(
                "email",
                "a user with this email address already exists",
            ));
        }
        Err(err) => return Err(err.into()),
    };

    // New accounts can read the album right away; writes need activation
    // plus an explicit grant.
    state.store.grant_capability(user.id, "photo:read").await?;

    let token = tokens::issue(
        state.store.as_ref(),
        user.id,
        Duration::hours(ACTIVATION_TOKEN_TTL_HOURS),
        Scope::Activation,
    )
    .await
    .map_err(|err| ApiError::Internal(anyhow::Error::new(err)))?;

    // The plaintext exists only in this mail and in nobody's logs.
    let mailer = state.mailer.clone();
    let recipient = user.email.clone();
    let payload = json!({ "activationToken": token.plaintext, "userID": user.id });
    state.spawn_background(async move { mailer.send(&recipient, "user_welcome", &payload) });

    Ok((StatusCode::ACCEPTED, Json(json!({ "user": user }))))
}

/// Consume an activation token and mark the account activated.
pub async fn activate(
    Extension(state): Extension<AppState>,
    payload: Option<Json<ActivateRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::BadRequest("Missing payload".to_string()));
    };

    let plaintext = request.token.trim();

    let mut user = match tokens::resolve(state.store.as_ref(), Scope::Activation, plaintext).await {
        Ok(user) => user,
        Err(TokenError::Malformed) => {
            return Err(ApiError::field("token", "must be 26 bytes long"));
        }
        Err(TokenError::NotFound) => {
            return Err(ApiError::field("token", "invalid or expired activation token"));
        }
        Err(err) => return Err(ApiError::Internal(anyhow::Error::new(err))),
    };

    user.activated = true;
    let user = state.store.update_user(&user).await?;

    // The token served its one-time purpose; cleanup is idempotent.
    tokens::revoke_all(state.store.as_ref(), Scope::Activation, user.id)
        .await
        .map_err(|err| ApiError::Internal(anyhow::Error::new(err)))?;

    Ok((StatusCode::OK, Json(json!({ "user": user }))))
}
