//! Account lifecycle: registration, email verification, resend, login and
//! profile updates. Handlers pass `now` in so time-dependent rules are testable.

use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    dto::{LoginRequest, RegisterRequest, UpdateProfileRequest},
    password::{hash_password, verify_password},
    repo_types::{NewUser, PhoneUpdate, ProfileUpdate, User, UserStatus, VerifyOutcome},
    session::{IssuedSession, SessionManager},
    tokens::generate_token,
};
use crate::{
    error::AppError,
    mailer::VerificationEmail,
    state::AppState,
};

pub const VERIFICATION_TTL: Duration = Duration::hours(1);
pub const RESEND_COOLDOWN_SECS: i64 = 60;
pub const DEFAULT_ROLE: &str = "user";

const NAME_MAX: usize = 100;
const PHONE_MAX: usize = 30;
const EMAIL_MAX: usize = 255;
const PASSWORD_MIN: usize = 8;
const PASSWORD_MAX: usize = 128;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    email.len() <= EMAIL_MAX && EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn required(field: Option<String>) -> Option<String> {
    field
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn valid_name(name: &str) -> bool {
    (1..=NAME_MAX).contains(&name.chars().count())
}

fn verify_url(state: &AppState, token: &str) -> String {
    format!("{}/verify?token={}", state.config.base_url, token)
}

/// Send through the configured mailer; a provider that does not answer
/// within the mail timeout counts as a failed send.
async fn deliver(state: &AppState, mail: &VerificationEmail) -> anyhow::Result<()> {
    let limit = state.config.mail.timeout;
    tokio::time::timeout(limit, state.mailer.send_verification(mail))
        .await
        .map_err(|_| anyhow::anyhow!("mail delivery timed out after {limit:?}"))?
}

// ---- registration ----

#[derive(Debug)]
pub struct Registered {
    pub user_id: Uuid,
    pub email_sent: bool,
}

pub async fn register(
    state: &AppState,
    req: RegisterRequest,
    now: OffsetDateTime,
) -> Result<Registered, AppError> {
    let (Some(name), Some(email), Some(phone), Some(password)) = (
        required(req.name),
        required(req.email),
        required(req.phone),
        req.password.filter(|p| !p.trim().is_empty()),
    ) else {
        return Err(AppError::validation("All fields are required"));
    };

    if !valid_name(&name) {
        return Err(AppError::validation("Name must be 1-100 characters"));
    }
    let email = normalize_email(&email);
    if !is_valid_email(&email) {
        return Err(AppError::validation("Invalid email"));
    }
    if phone.chars().count() > PHONE_MAX {
        return Err(AppError::validation("Phone must be at most 30 characters"));
    }
    if !(PASSWORD_MIN..=PASSWORD_MAX).contains(&password.chars().count()) {
        return Err(AppError::validation("Password must be 8-128 characters"));
    }

    let password_hash = hash_password(&password)?;
    let token = generate_token()?;

    let new = NewUser {
        name: name.clone(),
        email: email.clone(),
        phone,
        password_hash,
        role: DEFAULT_ROLE.to_string(),
        verification_token: token.clone(),
        verification_token_expires_at: now + VERIFICATION_TTL,
    };

    let Some(user) = state.store.insert_pending_user(&new, now).await? else {
        warn!(email = %email, "email already registered");
        return Err(AppError::conflict("Email already registered"));
    };
    info!(user_id = %user.id, email = %user.email, "user registered (pending)");

    // The account row is committed; mail is best-effort from here on.
    let mail = VerificationEmail {
        to: email,
        name,
        verify_url: verify_url(state, &token),
    };
    let email_sent = match deliver(state, &mail).await {
        Ok(()) => {
            if let Err(e) = state.store.mark_verification_sent(user.id, now).await {
                warn!(error = %e, user_id = %user.id, "failed to stamp verification email");
            }
            true
        }
        Err(e) => {
            warn!(error = %e, user_id = %user.id, "verification email not delivered");
            false
        }
    };

    Ok(Registered {
        user_id: user.id,
        email_sent,
    })
}

// ---- verification ----

/// Consume a verification token. Unknown, used and expired tokens are
/// indistinguishable to the caller.
pub async fn verify_email(
    state: &AppState,
    token: &str,
    now: OffsetDateTime,
) -> Result<VerifyOutcome, AppError> {
    let lock = state.store.lock_pending_by_token(token).await?;

    let found = lock
        .user()
        .filter(|u| u.status == UserStatus::Pending)
        .map(|u| (u.id, u.verification_token_expires_at));
    let Some((id, expires_at)) = found else {
        lock.release().await?;
        return Ok(VerifyOutcome::InvalidOrExpired);
    };

    if !expires_at.is_some_and(|exp| exp > now) {
        lock.release().await?;
        info!(user_id = %id, "verification token expired");
        return Ok(VerifyOutcome::InvalidOrExpired);
    }

    lock.activate(now).await?;
    info!(user_id = %id, "email verified");
    Ok(VerifyOutcome::Activated(id))
}

// ---- resend ----

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResendOutcome {
    /// Nothing to send; reported to the client exactly like a send.
    Accepted,
    Throttled { remaining_secs: i64 },
    Sent { cooldown_secs: i64 },
}

pub async fn resend_verification(
    state: &AppState,
    email: Option<String>,
    now: OffsetDateTime,
) -> Result<ResendOutcome, AppError> {
    let Some(email) = required(email)
        .map(|e| normalize_email(&e))
        .filter(|e| is_valid_email(e))
    else {
        return Err(AppError::validation("Invalid email"));
    };

    // The row lock spans check, send and stamp so concurrent resends serialise.
    let lock = state.store.lock_user_by_email(&email).await?;
    let Some(user) = lock.user().cloned() else {
        lock.release().await?;
        info!(email = %email, "resend for unknown email (hidden)");
        return Ok(ResendOutcome::Accepted);
    };

    if user.status != UserStatus::Pending {
        lock.release().await?;
        info!(user_id = %user.id, "resend for non-pending account (hidden)");
        return Ok(ResendOutcome::Accepted);
    }

    let Some(token) = user.verification_token.clone() else {
        lock.release().await?;
        return Err(AppError::validation(
            "Verification token not found. Please register again.",
        ));
    };

    // A token without an expiry is still sendable; only a passed expiry is final.
    if user.verification_token_expires_at.is_some_and(|exp| exp <= now) {
        lock.release().await?;
        return Err(AppError::validation(
            "The verification link has expired. Please register again.",
        ));
    }

    if let Some(last) = user.last_verification_email_sent_at {
        let elapsed = (now - last).whole_seconds().max(0);
        if elapsed < RESEND_COOLDOWN_SECS {
            lock.release().await?;
            let remaining_secs = RESEND_COOLDOWN_SECS - elapsed;
            info!(user_id = %user.id, remaining_secs, "resend throttled");
            return Ok(ResendOutcome::Throttled { remaining_secs });
        }
    }

    let mail = VerificationEmail {
        to: user.email.clone(),
        name: user.name.clone(),
        verify_url: verify_url(state, &token),
    };
    if let Err(e) = deliver(state, &mail).await {
        // Dropping the lock rolls back; the throttle anchor stays as it was.
        drop(lock);
        return Err(AppError::upstream("Failed to send verification email", e));
    }

    lock.mark_verification_sent(now).await?;
    info!(user_id = %user.id, "verification email re-sent");
    Ok(ResendOutcome::Sent {
        cooldown_secs: RESEND_COOLDOWN_SECS,
    })
}

// ---- login ----

pub async fn login(
    state: &AppState,
    req: LoginRequest,
    now: OffsetDateTime,
) -> Result<(IssuedSession, User), AppError> {
    let (Some(email), Some(password)) = (
        required(req.email),
        req.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::validation("Email and password are required"));
    };
    let email = normalize_email(&email);

    let Some(user) = state.store.find_user_by_email(&email).await? else {
        warn!(email = %email, "login unknown email");
        return Err(AppError::unauthorized(INVALID_CREDENTIALS));
    };

    if !user.is_active() {
        warn!(user_id = %user.id, "login before email verification");
        return Err(AppError::forbidden("Email address has not been verified"));
    }

    if !verify_password(&password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::unauthorized(INVALID_CREDENTIALS));
    }

    let session = SessionManager::from_ref(state).issue(user.id, now).await?;
    info!(user_id = %user.id, "user logged in");
    Ok((session, user))
}

// ---- profile ----

pub async fn update_profile(
    state: &AppState,
    user_id: Uuid,
    req: UpdateProfileRequest,
    now: OffsetDateTime,
) -> Result<User, AppError> {
    let name = req.name.map(|n| n.trim().to_string()).unwrap_or_default();
    if !valid_name(&name) {
        return Err(AppError::validation("Name must be 1-100 characters"));
    }

    let phone = match req.phone {
        None => PhoneUpdate::Keep,
        Some(None) => PhoneUpdate::Clear,
        Some(Some(p)) => {
            let p = p.trim();
            if p.is_empty() {
                PhoneUpdate::Clear
            } else if p.chars().count() > PHONE_MAX {
                return Err(AppError::validation("Phone must be at most 30 characters"));
            } else {
                PhoneUpdate::Set(p.to_string())
            }
        }
    };

    let update = ProfileUpdate { name, phone };
    let Some(user) = state.store.update_profile(user_id, &update, now).await? else {
        return Err(AppError::unauthorized("Session is invalid"));
    };
    info!(user_id = %user.id, "profile updated");
    Ok(user)
}
