mod admin;
mod error;
mod json;
mod library;
mod users;

use axum::{Json, Router, response::IntoResponse, routing::get};
use serde::Serialize;
use std::sync::Arc;

use crate::db::Database;
use crate::jwt::TokenIssuer;
use crate::rate_limit::RateLimitConfig;
use crate::session::SessionEngine;

pub use error::ApiError;
pub use json::ApiJson;
pub use users::UsersState;

/// Create the API router. Mounted under `/api/v1`.
pub fn create_api_router(
    db: Database,
    issuer: Arc<TokenIssuer>,
    sessions: Arc<SessionEngine>,
    rate_limit_config: Arc<RateLimitConfig>,
) -> Router {
    let library_state = library::LibraryState {
        db: db.clone(),
        issuer: issuer.clone(),
    };

    let admin_state = admin::AdminState {
        db: db.clone(),
        issuer: issuer.clone(),
    };

    let users_state = users::UsersState {
        db,
        issuer,
        sessions,
        rate_limit_config,
    };

    Router::new()
        .route("/health", get(health))
        .nest("/admin", admin::router(admin_state))
        .merge(library::router(library_state))
        .merge(users::router(users_state))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// Fallback for unknown routes.
pub async fn not_found() -> ApiError {
    ApiError::not_found("Route not found")
}
