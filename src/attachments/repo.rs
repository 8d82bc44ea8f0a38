use anyhow::Context;
use sqlx::PgExecutor;
use uuid::Uuid;

use super::repo_types::{AttachmentRecord, AttachmentSummary, Post};

pub async fn find_attachment<'e>(
    db: impl PgExecutor<'e>,
    id: Uuid,
) -> anyhow::Result<Option<AttachmentRecord>> {
    let row = sqlx::query_as::<_, AttachmentRecord>(
        r#"
        SELECT a.id, a.filename, a.content_type, a.storage_provider, a.storage_key,
               a.post_id, p.published
          FROM attachments a
          LEFT JOIN posts p ON p.id = a.post_id
         WHERE a.id = $1
         LIMIT 1
        "#,
    )
    .bind(id)
    .fetch_optional(db)
    .await
    .context("find attachment")?;
    Ok(row)
}

/// Attachments of a published post, oldest first. Unpublished or missing
/// posts yield an empty list.
pub async fn list_published_by_post<'e>(
    db: impl PgExecutor<'e>,
    post_id: Uuid,
) -> anyhow::Result<Vec<AttachmentSummary>> {
    let rows = sqlx::query_as::<_, AttachmentSummary>(
        r#"
        SELECT a.id, a.filename, a.content_type, a.created_at
          FROM attachments a
          JOIN posts p ON p.id = a.post_id
         WHERE a.post_id = $1
           AND p.published = TRUE
         ORDER BY a.created_at ASC
        "#,
    )
    .bind(post_id)
    .fetch_all(db)
    .await
    .context("list attachments by post")?;
    Ok(rows)
}

pub async fn find_published_post<'e>(
    db: impl PgExecutor<'e>,
    id: Uuid,
) -> anyhow::Result<Option<Post>> {
    let row = sqlx::query_as::<_, Post>(
        r#"
        SELECT id, title, content, created_at
          FROM posts
         WHERE id = $1 AND published = TRUE
         LIMIT 1
        "#,
    )
    .bind(id)
    .fetch_optional(db)
    .await
    .context("find published post")?;
    Ok(row)
}
