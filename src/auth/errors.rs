//! Authentication error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum AuthErrorKind {
    MissingToken,
    InvalidToken,
    UserNotFound,
    InsufficientRole,
    DatabaseError,
}

/// Rejection of the authentication extractors.
#[derive(Debug)]
pub struct ApiAuthError {
    kind: AuthErrorKind,
}

impl ApiAuthError {
    pub(super) fn new(kind: AuthErrorKind) -> Self {
        Self { kind }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind {
            AuthErrorKind::MissingToken => StatusCode::UNAUTHORIZED,
            AuthErrorKind::InvalidToken | AuthErrorKind::InsufficientRole => StatusCode::FORBIDDEN,
            AuthErrorKind::UserNotFound => StatusCode::NOT_FOUND,
            AuthErrorKind::DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &'static str {
        match self.kind {
            AuthErrorKind::MissingToken => "Unauthorized: No token provided",
            AuthErrorKind::InvalidToken => "Forbidden: Invalid token",
            AuthErrorKind::UserNotFound => "User not found",
            AuthErrorKind::InsufficientRole => "Forbidden: Admin access required",
            AuthErrorKind::DatabaseError => "Database error",
        }
    }
}

impl IntoResponse for ApiAuthError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct ErrorResponse {
            message: &'static str,
            status_code: u16,
        }

        let status = self.status_code();
        (
            status,
            Json(ErrorResponse {
                message: self.message(),
                status_code: status.as_u16(),
            }),
        )
            .into_response()
    }
}
