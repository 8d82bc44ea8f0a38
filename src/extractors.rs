//! JSON body extractor whose rejections go through `AppError`.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::AppError;

/// Like `axum::Json`, but every malformed body is a 400 `{message}`.
/// serde's error text is logged, never returned.
#[derive(Debug, Clone)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await.map_err(|e| {
            debug!(error = %e, "json body rejected");
            match e {
                JsonRejection::JsonDataError(_) => AppError::validation("Invalid request body"),
                JsonRejection::JsonSyntaxError(_) => AppError::validation("Malformed JSON body"),
                JsonRejection::MissingJsonContentType(_) => {
                    AppError::validation("Expected a JSON request body")
                }
                _ => AppError::validation("Invalid request body"),
            }
        })?;
        Ok(JsonBody(value))
    }
}
