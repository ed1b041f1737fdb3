//! Followed movies and watch history of the current user.

use axum::{Json, Router, extract::State, response::IntoResponse, routing::put};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{ApiError, ResultExt};
use super::json::ApiJson;
use super::users::with_access_token;
use crate::auth::Auth;
use crate::db::{Database, UserProfile};
use crate::impl_has_auth_backend;
use crate::jwt::TokenIssuer;

#[derive(Clone)]
pub struct LibraryState {
    pub db: Database,
    pub issuer: Arc<TokenIssuer>,
}

impl_has_auth_backend!(LibraryState);

pub fn router(state: LibraryState) -> Router {
    Router::new()
        .route("/addFollowedMovie", put(add_followed_movie))
        .route("/removeFollowedMovie", put(remove_followed_movie))
        .route("/addToHistory", put(add_to_history))
        .with_state(state)
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SlugRequest {
    slug: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct HistoryRequest {
    movie_slug: String,
    /// Episode number or name; clients send either.
    ep: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct UserResponse {
    user: UserProfile,
}

async fn add_followed_movie(
    State(state): State<LibraryState>,
    auth: Auth,
    ApiJson(payload): ApiJson<SlugRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let slug = payload.slug.trim();
    if slug.is_empty() {
        return Err(ApiError::bad_request("Movie slug is required"));
    }

    let added = state
        .db
        .library()
        .follow(auth.user.id, slug)
        .await
        .db_err("Failed to follow movie")?;
    if !added {
        return Err(ApiError::bad_request("Movie already followed"));
    }

    let user = state
        .db
        .library()
        .profile(&auth.user)
        .await
        .db_err("Failed to load profile")?;
    Ok(Json(UserResponse { user }))
}

async fn remove_followed_movie(
    State(state): State<LibraryState>,
    auth: Auth,
    ApiJson(payload): ApiJson<SlugRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let slug = payload.slug.trim();
    if slug.is_empty() {
        return Err(ApiError::bad_request("Movie slug is required"));
    }

    let removed = state
        .db
        .library()
        .unfollow(auth.user.id, slug)
        .await
        .db_err("Failed to unfollow movie")?;
    if !removed {
        return Err(ApiError::not_found("Movie not found in followed list"));
    }

    let user = state
        .db
        .library()
        .profile(&auth.user)
        .await
        .db_err("Failed to load profile")?;
    Ok(Json(UserResponse { user }))
}

async fn add_to_history(
    State(state): State<LibraryState>,
    auth: Auth,
    ApiJson(payload): ApiJson<HistoryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let movie_slug = payload.movie_slug.trim();
    let ep = match payload.ep {
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    if movie_slug.is_empty() || ep.is_empty() {
        return Err(ApiError::bad_request(
            "Movie slug and episode number are required",
        ));
    }

    state
        .db
        .library()
        .record_history(auth.user.id, movie_slug, &ep)
        .await
        .db_err("Failed to record history")?;

    Ok(Json(
        with_access_token(&state.db, &state.issuer, &auth.user).await?,
    ))
}
