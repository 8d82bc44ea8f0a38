use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{CredentialStore, UserLock};
use crate::attachments::repo as attachment_repo;
use crate::attachments::repo_types::{AttachmentRecord, AttachmentSummary, Post};
use crate::auth::repo as auth_repo;
use crate::auth::repo_types::{NewUser, ProfileUpdate, User};
use crate::config::AppConfig;

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;
        Ok(Self { db })
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }

    async fn begin(&self) -> anyhow::Result<Transaction<'static, Postgres>> {
        self.db.begin().await.context("begin tx")
    }
}

/// Row lock held by an open transaction. Dropping it rolls back.
struct PgUserLock {
    tx: Transaction<'static, Postgres>,
    user: Option<User>,
}

impl PgUserLock {
    fn locked_id(&self) -> anyhow::Result<Uuid> {
        self.user
            .as_ref()
            .map(|u| u.id)
            .context("no user row is locked")
    }
}

#[async_trait]
impl UserLock for PgUserLock {
    fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    async fn activate(mut self: Box<Self>, now: OffsetDateTime) -> anyhow::Result<()> {
        let id = self.locked_id()?;
        User::activate(&mut *self.tx, id, now).await?;
        self.tx.commit().await.context("commit activation")?;
        Ok(())
    }

    async fn mark_verification_sent(mut self: Box<Self>, now: OffsetDateTime) -> anyhow::Result<()> {
        let id = self.locked_id()?;
        User::mark_verification_sent(&mut *self.tx, id, now).await?;
        self.tx.commit().await.context("commit verification stamp")?;
        Ok(())
    }

    async fn release(self: Box<Self>) -> anyhow::Result<()> {
        self.tx.commit().await.context("release user lock")?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        User::find_by_email(&self.db, email).await
    }

    async fn insert_pending_user(
        &self,
        new: &NewUser,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let mut tx = self.begin().await?;
        let user = User::insert_pending(&mut *tx, new, now).await?;
        tx.commit().await.context("commit registration")?;
        Ok(user)
    }

    async fn mark_verification_sent(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> anyhow::Result<()> {
        User::mark_verification_sent(&self.db, user_id, now).await
    }

    async fn lock_user_by_email(&self, email: &str) -> anyhow::Result<Box<dyn UserLock>> {
        let mut tx = self.begin().await?;
        let user = User::lock_by_email(&mut *tx, email).await?;
        Ok(Box::new(PgUserLock { tx, user }))
    }

    async fn lock_pending_by_token(&self, token: &str) -> anyhow::Result<Box<dyn UserLock>> {
        let mut tx = self.begin().await?;
        let user = User::lock_pending_by_token(&mut *tx, token).await?;
        Ok(Box::new(PgUserLock { tx, user }))
    }

    async fn update_profile(
        &self,
        user_id: Uuid,
        update: &ProfileUpdate,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        User::update_profile(&self.db, user_id, update, now).await
    }

    async fn insert_session(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        auth_repo::insert_session(&self.db, user_id, token, expires_at).await
    }

    async fn find_session_user(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        auth_repo::find_session_user(&self.db, token, now).await
    }

    async fn extend_session(
        &self,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        auth_repo::extend_session(&self.db, token, expires_at).await
    }

    async fn delete_session(&self, token: &str) -> anyhow::Result<bool> {
        Ok(auth_repo::delete_session(&self.db, token).await? > 0)
    }

    async fn find_attachment(&self, id: Uuid) -> anyhow::Result<Option<AttachmentRecord>> {
        attachment_repo::find_attachment(&self.db, id).await
    }

    async fn list_post_attachments(
        &self,
        post_id: Uuid,
    ) -> anyhow::Result<Vec<AttachmentSummary>> {
        attachment_repo::list_published_by_post(&self.db, post_id).await
    }

    async fn find_published_post(&self, id: Uuid) -> anyhow::Result<Option<Post>> {
        attachment_repo::find_published_post(&self.db, id).await
    }
}
