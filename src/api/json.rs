//! JSON body extractor that reports failures in the API error format.

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
};

use super::error::ApiError;

/// Like [`Json`], but a missing, malformed or mistyped body becomes a 400
/// `ApiError` instead of axum's plain-text rejection.
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError::bad_request(rejection.body_text())),
        }
    }
}
