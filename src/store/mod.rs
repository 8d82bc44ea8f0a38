//! Credential store seam.
//!
//! Handlers never see a connection pool directly: they go through
//! `CredentialStore`, which the app state carries as `Arc<dyn CredentialStore>`.
//! Each method is one transaction. Check-then-act flows (verification,
//! resend throttling) get a `UserLock`, a row lock that lives until it is
//! consumed or dropped; dropping it without consuming rolls back.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::attachments::repo_types::{AttachmentRecord, AttachmentSummary, Post};
use crate::auth::repo_types::{NewUser, ProfileUpdate, User};

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use postgres::PgStore;

/// A locked user row (or the absence of one) inside an open transaction.
#[async_trait]
pub trait UserLock: Send {
    fn user(&self) -> Option<&User>;

    /// Flip the locked pending user to `active` and commit.
    async fn activate(self: Box<Self>, now: OffsetDateTime) -> anyhow::Result<()>;

    /// Record a verification email dispatch and commit.
    async fn mark_verification_sent(self: Box<Self>, now: OffsetDateTime) -> anyhow::Result<()>;

    /// Finish without changes.
    async fn release(self: Box<Self>) -> anyhow::Result<()>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    /// Insert-if-absent on email. `None` when the email is already registered.
    async fn insert_pending_user(
        &self,
        new: &NewUser,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>>;

    async fn mark_verification_sent(&self, user_id: Uuid, now: OffsetDateTime)
        -> anyhow::Result<()>;

    async fn lock_user_by_email(&self, email: &str) -> anyhow::Result<Box<dyn UserLock>>;

    /// Lock the `pending` user holding this verification token.
    async fn lock_pending_by_token(&self, token: &str) -> anyhow::Result<Box<dyn UserLock>>;

    async fn update_profile(
        &self,
        user_id: Uuid,
        update: &ProfileUpdate,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>>;

    async fn insert_session(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()>;

    /// User behind a session token that has not expired at `now`.
    async fn find_session_user(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>>;

    async fn extend_session(&self, token: &str, expires_at: OffsetDateTime)
        -> anyhow::Result<()>;

    /// Returns whether a row was deleted.
    async fn delete_session(&self, token: &str) -> anyhow::Result<bool>;

    async fn find_attachment(&self, id: Uuid) -> anyhow::Result<Option<AttachmentRecord>>;

    async fn list_post_attachments(&self, post_id: Uuid)
        -> anyhow::Result<Vec<AttachmentSummary>>;

    async fn find_published_post(&self, id: Uuid) -> anyhow::Result<Option<Post>>;
}
