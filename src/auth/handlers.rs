use axum::{
    extract::{FromRef, Query, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    auth::{
        cookie,
        dto::{
            LoginRequest, LoginResponse, MessageResponse, Profile, RegisterRequest,
            RegisterResponse, ResendRequest, ResendResponse, UpdateProfileRequest, VerifyQuery,
        },
        extractors::AuthUser,
        repo_types::VerifyOutcome,
        services::{self, ResendOutcome},
        session::SessionManager,
    },
    error::AppError,
    extractors::JsonBody,
    state::AppState,
};

pub fn account_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/verify", get(verify))
        .route("/resend", post(resend))
        .route("/login", post(login))
        .route("/logout", post(logout))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me).patch(update_me))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let out = services::register(&state, payload, OffsetDateTime::now_utc()).await?;
    info!(user_id = %out.user_id, email_sent = out.email_sent, "registration accepted");
    let message = if out.email_sent {
        "Registration successful. Check your email to verify your account."
    } else {
        "Registration successful, but the verification email could not be sent. Please request a new one."
    };
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: message.into(),
            email_sent: out.email_sent,
        }),
    ))
}

#[instrument(skip(state, q))]
pub async fn verify(
    State(state): State<AppState>,
    Query(q): Query<VerifyQuery>,
) -> Result<Redirect, AppError> {
    let Some(token) = q.token.filter(|t| !t.is_empty()) else {
        return Err(AppError::validation("Verification token is missing"));
    };
    match services::verify_email(&state, &token, OffsetDateTime::now_utc()).await? {
        VerifyOutcome::Activated(_) => Ok(Redirect::to(&state.config.verify_success_redirect)),
        VerifyOutcome::InvalidOrExpired => Err(AppError::validation(
            "The verification link is invalid or has expired",
        )),
    }
}

#[instrument(skip(state, payload))]
pub async fn resend(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<ResendRequest>,
) -> Result<Json<ResendResponse>, AppError> {
    let req_id = Uuid::new_v4().to_string();
    let outcome =
        services::resend_verification(&state, payload.email, OffsetDateTime::now_utc()).await?;
    let cooldown_remaining_sec = match outcome {
        ResendOutcome::Accepted => None,
        ResendOutcome::Throttled { remaining_secs } => Some(remaining_secs),
        ResendOutcome::Sent { cooldown_secs } => Some(cooldown_secs),
    };
    info!(req_id = %req_id, ?outcome, "resend handled");
    Ok(Json(ResendResponse {
        message: "OK".into(),
        cooldown_remaining_sec,
        req_id,
    }))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (session, user) = services::login(&state, payload, OffsetDateTime::now_utc()).await?;
    let set_cookie =
        cookie::session_cookie(&state.config.session, &session.token).map_err(AppError::internal)?;
    Ok((
        [(SET_COOKIE, set_cookie)],
        Json(LoginResponse {
            message: "Login successful".into(),
            role: user.role,
        }),
    ))
}

/// Deletes the session if there is one; the cookie is cleared in every case.
#[instrument(skip(state, headers))]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let cfg = &state.config.session;
    let clear = cookie::clear_session_cookie(cfg);

    let mut res = match cookie::session_token(&headers, &cfg.cookie_name) {
        None => Json(MessageResponse::new("Logged out")).into_response(),
        Some(token) => match SessionManager::from_ref(&state).revoke(&token).await {
            Ok(_) => Json(MessageResponse::new("Logged out")).into_response(),
            Err(e) => {
                error!(error = %e, "session delete failed during logout");
                AppError::internal(e).into_response()
            }
        },
    };
    res.headers_mut().append(SET_COOKIE, clear);
    res
}

#[instrument(skip(user))]
pub async fn get_me(AuthUser(user): AuthUser) -> Json<Profile> {
    Json(Profile::from(user))
}

#[instrument(skip(state, user, payload))]
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    JsonBody(payload): JsonBody<UpdateProfileRequest>,
) -> Result<Json<Profile>, AppError> {
    let updated =
        services::update_profile(&state, user.id, payload, OffsetDateTime::now_utc()).await?;
    Ok(Json(Profile::from(updated)))
}
