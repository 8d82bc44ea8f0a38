//! HTTP-facing error taxonomy.
//!
//! Every failure a handler can report maps to exactly one variant here.
//! 5xx variants are logged with a correlation id. Their source text rides
//! along as a response extension and is only written into the body by
//! `expose_error_detail` when the config enables it.

use axum::{
    extract::State,
    http::{header::CONTENT_LENGTH, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{message}")]
    Upstream {
        message: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Internal server error")]
    Internal(#[source] anyhow::Error),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn upstream(msg: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Upstream {
            message: msg.into(),
            source,
        }
    }

    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "reqId", skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
}

/// Source text of a 5xx, kept off the wire unless debug detail is on.
#[derive(Debug, Clone)]
pub struct ErrorDetail {
    message: String,
    req_id: String,
    detail: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();

        let detail = match &self {
            Self::Upstream { source, .. } | Self::Internal(source) => {
                let req_id = Uuid::new_v4().to_string();
                error!(req_id = %req_id, %status, error = ?source, "request failed");
                Some(ErrorDetail {
                    message: message.clone(),
                    req_id,
                    detail: format!("{source:#}"),
                })
            }
            _ => None,
        };

        let body = ErrorBody {
            message,
            req_id: detail.as_ref().map(|d| d.req_id.clone()),
            debug: None,
        };
        let mut res = (status, Json(body)).into_response();
        if let Some(detail) = detail {
            res.extensions_mut().insert(detail);
        }
        res
    }
}

/// Response mapper: with `debug_errors` on, rewrite 5xx bodies to carry the
/// source error text.
pub async fn expose_error_detail(State(state): State<AppState>, mut res: Response) -> Response {
    let Some(detail) = res.extensions_mut().remove::<ErrorDetail>() else {
        return res;
    };
    if !state.config.debug_errors {
        return res;
    }
    let body = ErrorBody {
        message: detail.message,
        req_id: Some(detail.req_id),
        debug: Some(detail.detail),
    };
    let (mut parts, _) = res.into_parts();
    parts.headers.remove(CONTENT_LENGTH);
    let rebuilt = Json(body).into_response();
    Response::from_parts(parts, rebuilt.into_body())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let res = err.into_response();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn taxonomy_maps_to_status_codes() {
        assert_eq!(AppError::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::unauthorized("x").status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::forbidden("x").status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::conflict("x").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::upstream("x", anyhow::anyhow!("boom")).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::internal(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn internal_error_hides_driver_text() {
        let (status, body) =
            body_json(AppError::internal(anyhow::anyhow!("relation \"users\" does not exist")))
                .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Internal server error");
        assert!(body["reqId"].is_string());
        assert!(body.get("debug").is_none());
        assert!(!body.to_string().contains("relation"));
    }

    #[tokio::test]
    async fn client_errors_carry_message_only() {
        let (status, body) = body_json(AppError::conflict("Email already registered")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["message"], "Email already registered");
        assert!(body.get("reqId").is_none());
    }

    #[tokio::test]
    async fn debug_detail_follows_config() {
        use crate::state::testing::Harness;

        let quiet = Harness::new();
        let res = expose_error_detail(
            State(quiet.state.clone()),
            AppError::internal(anyhow::anyhow!("pool timed out")).into_response(),
        )
        .await;
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body.get("debug").is_none());

        let mut cfg = crate::config::AppConfig::for_tests();
        cfg.debug_errors = true;
        let loud = Harness::with_config(cfg);
        let res = expose_error_detail(
            State(loud.state.clone()),
            AppError::internal(anyhow::anyhow!("pool timed out")).into_response(),
        )
        .await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["message"], "Internal server error");
        assert!(body["reqId"].is_string());
        assert!(body["debug"].as_str().unwrap().contains("pool timed out"));
    }

    #[tokio::test]
    async fn debug_detail_never_touches_client_errors() {
        use crate::state::testing::Harness;

        let mut cfg = crate::config::AppConfig::for_tests();
        cfg.debug_errors = true;
        let h = Harness::with_config(cfg);
        let res = expose_error_detail(
            State(h.state.clone()),
            AppError::validation("Invalid email").into_response(),
        )
        .await;
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({"message": "Invalid email"}));
    }
}
