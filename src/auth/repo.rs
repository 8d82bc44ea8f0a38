//! SQL for the `users` and `sessions` tables.
//!
//! Functions that must run under a row lock take an executor so callers can
//! pass `&mut *tx`; the transaction itself is owned by the store.

use anyhow::Context;
use sqlx::PgExecutor;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, PhoneUpdate, ProfileUpdate, User, UserStatus};

macro_rules! user_columns {
    () => {
        "id, email, name, phone, password_hash, role, status, verification_token, \
         verification_token_expires_at, last_verification_email_sent_at, email_verified_at, \
         created_at, updated_at"
    };
}

impl User {
    pub async fn find_by_email<'e>(
        db: impl PgExecutor<'e>,
        email: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(concat!(
            "SELECT ",
            user_columns!(),
            " FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    /// Same as `find_by_email` but takes a row lock held until the
    /// surrounding transaction ends.
    pub async fn lock_by_email<'e>(
        db: impl PgExecutor<'e>,
        email: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(concat!(
            "SELECT ",
            user_columns!(),
            " FROM users WHERE email = $1 LIMIT 1 FOR UPDATE"
        ))
        .bind(email)
        .fetch_optional(db)
        .await
        .context("lock user by email")?;
        Ok(user)
    }

    /// Insert a pending user unless the email is taken.
    ///
    /// `ON CONFLICT DO NOTHING` makes the uniqueness check and the insert one
    /// statement; `None` means another registration already owns the email.
    pub async fn insert_pending<'e>(
        db: impl PgExecutor<'e>,
        new: &NewUser,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(concat!(
            r#"
            INSERT INTO users (
                name, email, phone, password_hash, role, status,
                verification_token, verification_token_expires_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            ON CONFLICT (email) DO NOTHING
            RETURNING "#,
            user_columns!()
        ))
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.phone)
        .bind(&new.password_hash)
        .bind(&new.role)
        .bind(UserStatus::Pending.as_str())
        .bind(&new.verification_token)
        .bind(new.verification_token_expires_at)
        .bind(now)
        .fetch_optional(db)
        .await
        .context("insert pending user")?;
        Ok(user)
    }

    /// Lock the pending user owning `token`.
    pub async fn lock_pending_by_token<'e>(
        db: impl PgExecutor<'e>,
        token: &str,
    ) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(concat!(
            "SELECT ",
            user_columns!(),
            " FROM users WHERE verification_token = $1 AND status = 'pending' LIMIT 1 FOR UPDATE"
        ))
        .bind(token)
        .fetch_optional(db)
        .await
        .context("lock pending user by token")?;
        Ok(user)
    }

    pub async fn activate<'e>(
        db: impl PgExecutor<'e>,
        id: Uuid,
        now: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
               SET status = $1,
                   email_verified_at = $2,
                   verification_token = NULL,
                   verification_token_expires_at = NULL,
                   updated_at = $2
             WHERE id = $3
            "#,
        )
        .bind(UserStatus::Active.as_str())
        .bind(now)
        .bind(id)
        .execute(db)
        .await
        .context("activate user")?;
        Ok(())
    }

    pub async fn mark_verification_sent<'e>(
        db: impl PgExecutor<'e>,
        id: Uuid,
        now: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users
               SET last_verification_email_sent_at = $1,
                   updated_at = $1
             WHERE id = $2
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(db)
        .await
        .context("stamp verification email")?;
        Ok(())
    }

    pub async fn update_profile<'e>(
        db: impl PgExecutor<'e>,
        id: Uuid,
        update: &ProfileUpdate,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let (touch_phone, phone) = match &update.phone {
            PhoneUpdate::Keep => (false, None),
            PhoneUpdate::Clear => (true, None),
            PhoneUpdate::Set(p) => (true, Some(p.as_str())),
        };
        let user = sqlx::query_as::<_, User>(concat!(
            r#"
            UPDATE users
               SET name = $1,
                   phone = CASE WHEN $2 THEN $3 ELSE phone END,
                   updated_at = $4
             WHERE id = $5
            RETURNING "#,
            user_columns!()
        ))
        .bind(&update.name)
        .bind(touch_phone)
        .bind(phone)
        .bind(now)
        .bind(id)
        .fetch_optional(db)
        .await
        .context("update profile")?;
        Ok(user)
    }
}

// ---- sessions ----

pub async fn insert_session<'e>(
    db: impl PgExecutor<'e>,
    user_id: Uuid,
    token: &str,
    expires_at: OffsetDateTime,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO sessions (user_id, session_token, expires_at)
        VALUES ($1, $2, $3)
        "#,
    )
    .bind(user_id)
    .bind(token)
    .bind(expires_at)
    .execute(db)
    .await
    .context("insert session")?;
    Ok(())
}

/// User behind a live (unexpired) session token.
pub async fn find_session_user<'e>(
    db: impl PgExecutor<'e>,
    token: &str,
    now: OffsetDateTime,
) -> anyhow::Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        r#"
        SELECT u.id, u.email, u.name, u.phone, u.password_hash, u.role, u.status,
               u.verification_token, u.verification_token_expires_at,
               u.last_verification_email_sent_at, u.email_verified_at,
               u.created_at, u.updated_at
          FROM sessions s
          JOIN users u ON u.id = s.user_id
         WHERE s.session_token = $1
           AND s.expires_at > $2
         LIMIT 1
        "#,
    )
    .bind(token)
    .bind(now)
    .fetch_optional(db)
    .await
    .context("find session user")?;
    Ok(user)
}

pub async fn extend_session<'e>(
    db: impl PgExecutor<'e>,
    token: &str,
    expires_at: OffsetDateTime,
) -> anyhow::Result<()> {
    sqlx::query("UPDATE sessions SET expires_at = $1 WHERE session_token = $2")
        .bind(expires_at)
        .bind(token)
        .execute(db)
        .await
        .context("extend session")?;
    Ok(())
}

pub async fn delete_session<'e>(db: impl PgExecutor<'e>, token: &str) -> anyhow::Result<u64> {
    let res = sqlx::query("DELETE FROM sessions WHERE session_token = $1")
        .bind(token)
        .execute(db)
        .await
        .context("delete session")?;
    Ok(res.rows_affected())
}
