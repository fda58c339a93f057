//! Photo routes.
//!
//! These are deliberately thin passthroughs to the persistence collaborator;
//! their job here is to exercise the capability gate.

use crate::api::{
    error::ApiError,
    middleware::CurrentUser,
    permissions,
    state::AppState,
};
use axum::{
    extract::{Extension, Path},
    http::{header::LOCATION, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct CreatePhotoRequest {
    pub title: String,
    #[serde(default)]
    pub caption: String,
}

pub async fn list(
    Extension(state): Extension<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> Result<impl IntoResponse, ApiError> {
    permissions::require_permission(&state, &current, "photo:read").await?;

    let photos = state.store.list_photos().await?;
    Ok(Json(json!({ "photos": photos })))
}

pub async fn show(
    Extension(state): Extension<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    permissions::require_permission(&state, &current, "photo:read").await?;

    let photo = state.store.photo(id).await?;
    Ok(Json(json!({ "photo": photo })))
}

pub async fn create(
    Extension(state): Extension<AppState>,
    Extension(current): Extension<CurrentUser>,
    payload: Option<Json<CreatePhotoRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    permissions::require_permission(&state, &current, "photo:write").await?;

    let Some(Json(request)) = payload else {
        return Err(ApiError::BadRequest("Missing payload".to_string()));
    };

    let photo = state
        .store
        .insert_photo(&request.title, &request.caption)
        .await?;

    let mut headers = HeaderMap::new();
    if let Ok(location) = format!("/v1/photo/{}", photo.id).parse() {
        headers.insert(LOCATION, location);
    }

    Ok((StatusCode::CREATED, headers, Json(json!({ "photo": photo }))))
}

pub async fn delete(
    Extension(state): Extension<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    permissions::require_permission(&state, &current, "photo:write").await?;

    state.store.delete_photo(id).await?;
    Ok(Json(json!({ "message": "photo successfully deleted" })))
}
