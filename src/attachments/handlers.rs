use axum::{
    extract::{Path, State},
    http::{
        header::{CACHE_CONTROL, LOCATION},
        HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tracing::instrument;

use super::{
    repo_types::{AttachmentSummary, Post},
    services::{self, AccessKind},
};
use crate::{auth::extractors::AuthUser, error::AppError, state::AppState};

pub fn post_routes() -> Router<AppState> {
    Router::new()
        .route("/posts/:id", get(get_post))
        .route("/posts/:id/attachments", get(list_attachments))
}

pub fn attachment_routes() -> Router<AppState> {
    Router::new()
        .route("/attachments/:id/download", get(download))
        .route("/attachments/:id/view", get(view))
}

#[instrument(skip(state))]
pub async fn get_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Post>, AppError> {
    Ok(Json(services::published_post(&state, &id).await?))
}

#[instrument(skip(state, _user))]
pub async fn list_attachments(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let items: Vec<AttachmentSummary> = services::list_for_post(&state, &id).await?;
    Ok(([(CACHE_CONTROL, HeaderValue::from_static("no-store"))], Json(items)))
}

#[instrument(skip(state, _user))]
pub async fn download(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let url = services::authorize_download(&state, &id, AccessKind::Download).await?;
    redirect_no_store(&url)
}

#[instrument(skip(state, _user))]
pub async fn view(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let url = services::authorize_download(&state, &id, AccessKind::View).await?;
    redirect_no_store(&url)
}

/// 302 to a capability URL that must not be cached anywhere.
fn redirect_no_store(url: &str) -> Result<Response, AppError> {
    let location = HeaderValue::from_str(url).map_err(AppError::internal)?;
    Ok((
        StatusCode::FOUND,
        [(LOCATION, location), (CACHE_CONTROL, HeaderValue::from_static("no-store"))],
    )
        .into_response())
}
