//! Request pipeline stages: panic recovery, rate limiting, authentication.
//!
//! Order matters: recover wraps everything so one request's fault cannot
//! take the process down; rate limiting runs before any credential work so
//! rejected clients cost nothing; authentication enriches the request with a
//! [`CurrentUser`] for the router and the permission gate.

use crate::api::{
    error::ApiError,
    state::AppState,
    store::User,
    tokens::{self, Scope, TokenError},
};
use anyhow::anyhow;
use axum::{
    body::Body,
    extract::{ConnectInfo, Extension, Request},
    http::{
        header::{AUTHORIZATION, CONNECTION, CONTENT_TYPE, VARY},
        HeaderMap, HeaderValue, Response as HttpResponse, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{
    any::Any,
    net::{IpAddr, SocketAddr},
};
use tracing::error;

/// Identity attached to every request by the authentication stage.
///
/// The anonymous sentinel participates in the same gate checks as real
/// identities so every request carries a non-null identity. Extracting this
/// from a route that is not behind [`authenticate`] is a programming error;
/// axum fails the request loudly with a 500.
#[derive(Clone, Debug)]
pub enum CurrentUser {
    Anonymous,
    Authenticated(User),
}

impl CurrentUser {
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

/// Rate-limit admission, keyed by client address.
pub async fn rate_limit(
    Extension(state): Extension<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if state.limiter.enabled() {
        let addr = match client_ip(&request) {
            Ok(addr) => addr,
            // An unidentifiable peer is an operational fault, not a limit
            // violation.
            Err(err) => return err.into_response(),
        };
        if !state.limiter.admit(addr) {
            return ApiError::RateLimited.into_response();
        }
    }

    next.run(request).await
}

/// Resolve the bearer credential and attach the caller's identity.
pub async fn authenticate(
    Extension(state): Extension<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let current = match bearer_token(request.headers()) {
        Ok(None) => Ok(CurrentUser::Anonymous),
        Ok(Some(plaintext)) => {
            match tokens::resolve(state.store.as_ref(), Scope::Authentication, &plaintext).await {
                Ok(user) => Ok(CurrentUser::Authenticated(user)),
                // Malformed, absent and expired all collapse to one 401.
                Err(TokenError::Malformed | TokenError::NotFound) => Err(ApiError::InvalidToken),
                Err(err) => Err(ApiError::Internal(anyhow::Error::new(err))),
            }
        }
        Err(err) => Err(err),
    };

    let response = match current {
        Ok(current) => {
            request.extensions_mut().insert(current);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    };

    with_vary(response)
}

/// Last-resort guard: convert a panic anywhere below the admission stage
/// into a generic internal-error response and mark the connection
/// non-reusable.
pub fn recovered(panic: Box<dyn Any + Send + 'static>) -> HttpResponse<Body> {
    error!("recovered from panic: {}", panic_message(panic.as_ref()));

    let body = json!({
        "error": "the server encountered a problem and could not process your request"
    });
    let mut response = HttpResponse::new(Body::from(body.to_string()));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Parse the `Authorization` header.
///
/// Absent means anonymous; anything other than a two-part `Bearer <token>`
/// shape is an invalid-token rejection.
fn bearer_token(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| ApiError::InvalidToken)?;

    let parts: Vec<&str> = value.split(' ').collect();
    if parts.len() != 2 || parts[0] != "Bearer" {
        return Err(ApiError::InvalidToken);
    }

    Ok(Some(parts[1].to_string()))
}

/// Client address for admission, preferring proxy headers over the socket
/// peer so the limiter keys on the real client behind a reverse proxy.
fn client_ip(request: &Request) -> Result<IpAddr, ApiError> {
    for header in ["x-forwarded-for", "x-real-ip"] {
        let candidate = request
            .headers()
            .get(header)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(candidate) = candidate {
            if let Ok(addr) = candidate.parse() {
                return Ok(addr);
            }
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .ok_or_else(|| ApiError::Internal(anyhow!("unable to determine client address")))
}

/// Responses depend on the identity-bearing header; tell intermediaries.
fn with_vary(mut response: Response) -> Response {
    response
        .headers_mut()
        .append(VARY, HeaderValue::from_static("Authorization"));
    response
}
