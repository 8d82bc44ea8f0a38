//! Session lifecycle: issue, resolve (with rolling expiry) and revoke.
//!
//! Sessions are rows keyed by an opaque token; every request re-reads the
//! store, so deleting a row revokes it immediately.

use std::sync::Arc;

use axum::extract::FromRef;
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{repo_types::User, tokens::generate_token};
use crate::{state::AppState, store::CredentialStore};

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn CredentialStore>,
    ttl: Duration,
}

impl FromRef<AppState> for SessionManager {
    fn from_ref(state: &AppState) -> Self {
        Self::new(
            state.store.clone(),
            Duration::seconds(state.config.session.ttl_seconds),
        )
    }
}

impl SessionManager {
    pub fn new(store: Arc<dyn CredentialStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Create a new session row. Other sessions of the user are untouched.
    pub async fn issue(&self, user_id: Uuid, now: OffsetDateTime) -> anyhow::Result<IssuedSession> {
        let token = generate_token()?;
        let expires_at = now + self.ttl;
        self.store.insert_session(user_id, &token, expires_at).await?;
        debug!(user_id = %user_id, "session issued");
        Ok(IssuedSession { token, expires_at })
    }

    /// Map a token to its active user, pushing the expiry to `now + ttl`.
    ///
    /// `Ok(None)` covers missing, expired and non-active-user sessions alike.
    pub async fn resolve(&self, token: &str, now: OffsetDateTime) -> anyhow::Result<Option<User>> {
        let Some(user) = self.store.find_session_user(token, now).await? else {
            return Ok(None);
        };
        if !user.is_active() {
            warn!(user_id = %user.id, "session belongs to a non-active account");
            return Ok(None);
        }
        if let Err(e) = self.store.extend_session(token, now + self.ttl).await {
            warn!(error = %e, user_id = %user.id, "failed to extend session");
        }
        Ok(Some(user))
    }

    /// Delete the session row. Unknown tokens are not an error.
    pub async fn revoke(&self, token: &str) -> anyhow::Result<bool> {
        let removed = self.store.delete_session(token).await?;
        debug!(removed, "session revoked");
        Ok(removed)
    }
}
