//! Attachment gateway: authorise access, then hand out a short-lived signed
//! URL. Bytes never pass through this service.

use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use super::repo_types::{AttachmentSummary, Post};
use crate::{
    error::AppError,
    state::AppState,
    storage::{Disposition, SUPPORTED_PROVIDER},
};

/// Lifetime of a signed download/view URL.
pub const SIGNED_URL_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Download,
    View,
}

pub fn parse_id(raw: &str) -> Result<Uuid, AppError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(AppError::validation("Missing id"));
    }
    Uuid::parse_str(raw).map_err(|_| AppError::validation("Invalid id"))
}

/// Authorise access to one attachment and mint its signed URL.
/// The caller has already established a valid session.
pub async fn authorize_download(
    state: &AppState,
    raw_id: &str,
    kind: AccessKind,
) -> Result<String, AppError> {
    let id = parse_id(raw_id)?;

    let Some(att) = state.store.find_attachment(id).await? else {
        return Err(AppError::not_found("Attachment not found"));
    };
    if att.post_id.is_none() {
        warn!(attachment_id = %id, "attachment is not linked to a post");
        return Err(AppError::validation("Attachment is not linked to a post"));
    }
    if att.published != Some(true) {
        return Err(AppError::forbidden("Attachment is not available"));
    }
    if att.storage_provider != SUPPORTED_PROVIDER {
        warn!(attachment_id = %id, provider = %att.storage_provider, "unsupported storage provider");
        return Err(AppError::validation("Unsupported storage provider"));
    }

    let disposition = match kind {
        AccessKind::Download => Disposition::Attachment {
            filename: att.filename,
        },
        AccessKind::View => Disposition::Inline {
            content_type: att.content_type,
        },
    };

    let url = state
        .storage
        .presign_get(&att.storage_key, SIGNED_URL_TTL, &disposition)
        .await
        .map_err(AppError::internal)?;
    info!(attachment_id = %id, ?kind, "signed url issued");
    Ok(url)
}

pub async fn list_for_post(
    state: &AppState,
    raw_post_id: &str,
) -> Result<Vec<AttachmentSummary>, AppError> {
    let post_id = parse_id(raw_post_id)?;
    Ok(state.store.list_post_attachments(post_id).await?)
}

pub async fn published_post(state: &AppState, raw_id: &str) -> Result<Post, AppError> {
    let id = parse_id(raw_id)?;
    state
        .store
        .find_published_post(id)
        .await?
        .ok_or_else(|| AppError::not_found("Post not found"))
}
