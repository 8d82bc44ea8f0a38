//! In-memory `CredentialStore` for tests.
//!
//! One async mutex guards all tables, so every method is atomic and a
//! `UserLock` blocks every other caller until it is consumed or dropped.
//! Changes made through a lock are staged and applied on commit only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{CredentialStore, UserLock};
use crate::attachments::repo_types::{AttachmentRecord, AttachmentSummary, Post};
use crate::auth::repo_types::{NewUser, PhoneUpdate, ProfileUpdate, User, UserStatus};

#[derive(Clone)]
struct StoredAttachment {
    record: AttachmentRecord,
    created_at: OffsetDateTime,
}

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    sessions: HashMap<String, (Uuid, OffsetDateTime)>,
    posts: HashMap<Uuid, (Post, bool)>,
    attachments: HashMap<Uuid, StoredAttachment>,
}

impl Tables {
    fn user_by_email(&self, email: &str) -> Option<&User> {
        self.users.values().find(|u| u.email == email)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    fail_session_deletes: AtomicBool,
    fail_session_lookups: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_session_deletes(&self, on: bool) {
        self.fail_session_deletes.store(on, Ordering::SeqCst);
    }

    pub fn fail_session_lookups(&self, on: bool) {
        self.fail_session_lookups.store(on, Ordering::SeqCst);
    }

    pub async fn user(&self, email: &str) -> Option<User> {
        self.tables.lock().await.user_by_email(email).cloned()
    }

    pub async fn user_count(&self) -> usize {
        self.tables.lock().await.users.len()
    }

    pub async fn session_expiry(&self, token: &str) -> Option<OffsetDateTime> {
        self.tables.lock().await.sessions.get(token).map(|(_, exp)| *exp)
    }

    pub async fn session_count(&self) -> usize {
        self.tables.lock().await.sessions.len()
    }

    /// Overwrite fields of a stored user, e.g. to age a token.
    pub async fn edit_user(&self, email: &str, f: impl FnOnce(&mut User)) {
        let mut t = self.tables.lock().await;
        if let Some(u) = t.users.values_mut().find(|u| u.email == email) {
            f(u);
        }
    }

    pub async fn add_post(&self, title: &str, published: bool) -> Uuid {
        let id = Uuid::new_v4();
        let post = Post {
            id,
            title: title.to_string(),
            content: format!("{title} body"),
            created_at: OffsetDateTime::now_utc(),
        };
        self.tables.lock().await.posts.insert(id, (post, published));
        id
    }

    pub async fn add_attachment(
        &self,
        post_id: Option<Uuid>,
        filename: &str,
        content_type: Option<&str>,
        storage_provider: &str,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let mut t = self.tables.lock().await;
        // strictly increasing so listing order is deterministic
        let created_at =
            OffsetDateTime::now_utc() + time::Duration::milliseconds(t.attachments.len() as i64);
        let record = AttachmentRecord {
            id,
            filename: filename.to_string(),
            content_type: content_type.map(str::to_string),
            storage_provider: storage_provider.to_string(),
            storage_key: format!("attachments/{id}/{filename}"),
            post_id,
            published: None,
        };
        t.attachments.insert(id, StoredAttachment { record, created_at });
        id
    }
}

enum Staged {
    Nothing,
    Activate(OffsetDateTime),
    Stamp(OffsetDateTime),
}

struct MemUserLock {
    guard: OwnedMutexGuard<Tables>,
    user: Option<User>,
}

impl MemUserLock {
    fn commit(mut self: Box<Self>, change: Staged) -> anyhow::Result<()> {
        let Some(id) = self.user.as_ref().map(|u| u.id) else {
            if matches!(change, Staged::Nothing) {
                return Ok(());
            }
            anyhow::bail!("no user row is locked");
        };
        let user = self
            .guard
            .users
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("locked user vanished"))?;
        match change {
            Staged::Nothing => {}
            Staged::Activate(now) => {
                user.status = UserStatus::Active;
                user.email_verified_at = Some(now);
                user.verification_token = None;
                user.verification_token_expires_at = None;
                user.updated_at = now;
            }
            Staged::Stamp(now) => {
                user.last_verification_email_sent_at = Some(now);
                user.updated_at = now;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl UserLock for MemUserLock {
    fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    async fn activate(self: Box<Self>, now: OffsetDateTime) -> anyhow::Result<()> {
        self.commit(Staged::Activate(now))
    }

    async fn mark_verification_sent(self: Box<Self>, now: OffsetDateTime) -> anyhow::Result<()> {
        self.commit(Staged::Stamp(now))
    }

    async fn release(self: Box<Self>) -> anyhow::Result<()> {
        self.commit(Staged::Nothing)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        Ok(self.tables.lock().await.user_by_email(email).cloned())
    }

    async fn insert_pending_user(
        &self,
        new: &NewUser,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let mut t = self.tables.lock().await;
        if t.user_by_email(&new.email).is_some() {
            return Ok(None);
        }
        let user = User {
            id: Uuid::new_v4(),
            email: new.email.clone(),
            name: new.name.clone(),
            phone: Some(new.phone.clone()),
            password_hash: new.password_hash.clone(),
            role: new.role.clone(),
            status: UserStatus::Pending,
            verification_token: Some(new.verification_token.clone()),
            verification_token_expires_at: Some(new.verification_token_expires_at),
            last_verification_email_sent_at: None,
            email_verified_at: None,
            created_at: now,
            updated_at: now,
        };
        t.users.insert(user.id, user.clone());
        Ok(Some(user))
    }

    async fn mark_verification_sent(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> anyhow::Result<()> {
        if let Some(u) = self.tables.lock().await.users.get_mut(&user_id) {
            u.last_verification_email_sent_at = Some(now);
            u.updated_at = now;
        }
        Ok(())
    }

    async fn lock_user_by_email(&self, email: &str) -> anyhow::Result<Box<dyn UserLock>> {
        let guard = self.tables.clone().lock_owned().await;
        let user = guard.user_by_email(email).cloned();
        Ok(Box::new(MemUserLock { guard, user }))
    }

    async fn lock_pending_by_token(&self, token: &str) -> anyhow::Result<Box<dyn UserLock>> {
        let guard = self.tables.clone().lock_owned().await;
        let user = guard
            .users
            .values()
            .find(|u| {
                u.status == UserStatus::Pending && u.verification_token.as_deref() == Some(token)
            })
            .cloned();
        Ok(Box::new(MemUserLock { guard, user }))
    }

    async fn update_profile(
        &self,
        user_id: Uuid,
        update: &ProfileUpdate,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        let mut t = self.tables.lock().await;
        let Some(u) = t.users.get_mut(&user_id) else {
            return Ok(None);
        };
        u.name = update.name.clone();
        match &update.phone {
            PhoneUpdate::Keep => {}
            PhoneUpdate::Clear => u.phone = None,
            PhoneUpdate::Set(p) => u.phone = Some(p.clone()),
        }
        u.updated_at = now;
        Ok(Some(u.clone()))
    }

    async fn insert_session(
        &self,
        user_id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        let mut t = self.tables.lock().await;
        anyhow::ensure!(!t.sessions.contains_key(token), "duplicate session token");
        t.sessions.insert(token.to_string(), (user_id, expires_at));
        Ok(())
    }

    async fn find_session_user(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> anyhow::Result<Option<User>> {
        if self.fail_session_lookups.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }
        let t = self.tables.lock().await;
        Ok(t.sessions
            .get(token)
            .filter(|(_, exp)| *exp > now)
            .and_then(|(uid, _)| t.users.get(uid))
            .cloned())
    }

    async fn extend_session(
        &self,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        if let Some(s) = self.tables.lock().await.sessions.get_mut(token) {
            s.1 = expires_at;
        }
        Ok(())
    }

    async fn delete_session(&self, token: &str) -> anyhow::Result<bool> {
        if self.fail_session_deletes.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }
        Ok(self.tables.lock().await.sessions.remove(token).is_some())
    }

    async fn find_attachment(&self, id: Uuid) -> anyhow::Result<Option<AttachmentRecord>> {
        let t = self.tables.lock().await;
        Ok(t.attachments.get(&id).map(|a| {
            let mut record = a.record.clone();
            record.published = record
                .post_id
                .and_then(|pid| t.posts.get(&pid))
                .map(|(_, published)| *published);
            record
        }))
    }

    async fn list_post_attachments(
        &self,
        post_id: Uuid,
    ) -> anyhow::Result<Vec<AttachmentSummary>> {
        let t = self.tables.lock().await;
        if !matches!(t.posts.get(&post_id), Some((_, true))) {
            return Ok(Vec::new());
        }
        let mut rows: Vec<_> = t
            .attachments
            .values()
            .filter(|a| a.record.post_id == Some(post_id))
            .map(|a| AttachmentSummary {
                id: a.record.id,
                filename: a.record.filename.clone(),
                content_type: a.record.content_type.clone(),
                created_at: a.created_at,
            })
            .collect();
        rows.sort_by_key(|a| a.created_at);
        Ok(rows)
    }

    async fn find_published_post(&self, id: Uuid) -> anyhow::Result<Option<Post>> {
        let t = self.tables.lock().await;
        Ok(t.posts
            .get(&id)
            .filter(|(_, published)| *published)
            .map(|(post, _)| post.clone()))
    }
}
