use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::SET_COOKIE, request::Parts, HeaderValue},
    response::{IntoResponse, Response},
};
use time::OffsetDateTime;

use super::{cookie, repo_types::User, session::SessionManager};
use crate::{error::AppError, state::AppState};

/// Resolves the session cookie to an active user, rolling the session expiry.
pub struct AuthUser(pub User);

/// Rejection for the session gate. 401s also expire the client cookie.
pub struct SessionRejection {
    clear_cookie: Option<HeaderValue>,
    error: AppError,
}

impl IntoResponse for SessionRejection {
    fn into_response(self) -> Response {
        let mut res = self.error.into_response();
        if let Some(v) = self.clear_cookie {
            res.headers_mut().append(SET_COOKIE, v);
        }
        res
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = SessionRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let cfg = &state.config.session;
        let unauthorized = |msg: &str| SessionRejection {
            clear_cookie: Some(cookie::clear_session_cookie(cfg)),
            error: AppError::unauthorized(msg),
        };

        let token = cookie::session_token(&parts.headers, &cfg.cookie_name)
            .ok_or_else(|| unauthorized("Not logged in"))?;

        let user = SessionManager::from_ref(state)
            .resolve(&token, OffsetDateTime::now_utc())
            .await
            .map_err(|e| SessionRejection {
                clear_cookie: None,
                error: AppError::internal(e),
            })?
            .ok_or_else(|| unauthorized("Session expired or invalid"))?;

        Ok(AuthUser(user))
    }
}
