use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Attachment metadata joined with its owning post's publication flag.
#[derive(Debug, Clone, FromRow)]
pub struct AttachmentRecord {
    pub id: Uuid,
    pub filename: String,
    pub content_type: Option<String>,
    pub storage_provider: String,
    pub storage_key: String,
    pub post_id: Option<Uuid>,
    /// `None` when the attachment has no post.
    pub published: Option<bool>,
}

/// Public listing entry; storage details stay server-side.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AttachmentSummary {
    pub id: Uuid,
    pub filename: String,
    pub content_type: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
