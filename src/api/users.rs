//! Account and session endpoints.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{ApiError, ResultExt};
use super::json::ApiJson;
use crate::auth::{Auth, RefreshCookie, clear_refresh_cookie, refresh_cookie};
use crate::db::{Database, User, UserProfile};
use crate::impl_has_auth_backend;
use crate::jwt::TokenIssuer;
use crate::rate_limit::{RateLimitConfig, rate_limit_auth};
use crate::session::{Session, SessionEngine, SessionError};

#[derive(Clone)]
pub struct UsersState {
    pub db: Database,
    pub issuer: Arc<TokenIssuer>,
    pub sessions: Arc<SessionEngine>,
    pub rate_limit_config: Arc<RateLimitConfig>,
}

impl_has_auth_backend!(UsersState);

pub fn router(state: UsersState) -> Router {
    let credential_router = Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/social-auth", post(social_auth))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limit_config.clone(),
            rate_limit_auth,
        ));

    let session_router = Router::new()
        .route("/refresh", get(refresh))
        .route("/logout", get(logout))
        .route("/update-user-info", put(update_user_info))
        .route("/update-user-password", put(update_user_password))
        .route("/{id}", get(get_user))
        .with_state(state);

    Router::new().merge(credential_router).merge(session_router)
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RegisterRequest {
    name: String,
    email: String,
    password: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SocialAuthRequest {
    email: String,
    name: String,
    avatar: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct UpdateInfoRequest {
    name: String,
}

#[derive(Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct UpdatePasswordRequest {
    old_password: String,
    new_password: String,
}

#[derive(Serialize)]
struct SuccessResponse {
    success: bool,
}

/// Profile plus a fresh access token.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct UserWithTokenResponse {
    pub user: UserProfile,
    pub access_token: String,
}

/// Social sign-in answers with the profile fields at the top level.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SocialAuthResponse {
    #[serde(flatten)]
    user: UserProfile,
    access_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessTokenResponse {
    access_token: String,
}

async fn register(
    State(state): State<UsersState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .sessions
        .register(&payload.name, &payload.email, &payload.password)
        .await?;

    Ok((StatusCode::CREATED, Json(SuccessResponse { success: true })))
}

async fn login(
    State(state): State<UsersState>,
    RefreshCookie(cookie): RefreshCookie,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .sessions
        .login(&payload.email, &payload.password, cookie.as_deref())
        .await?;

    let (cookie, user, access_token) = session_parts(&state, session).await?;
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(UserWithTokenResponse { user, access_token }),
    ))
}

async fn social_auth(
    State(state): State<UsersState>,
    RefreshCookie(cookie): RefreshCookie,
    ApiJson(payload): ApiJson<SocialAuthRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .sessions
        .social_sign_in(
            &payload.email,
            &payload.name,
            payload.avatar.as_deref().filter(|a| !a.is_empty()),
            cookie.as_deref(),
        )
        .await?;

    let (cookie, user, access_token) = session_parts(&state, session).await?;
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(SocialAuthResponse { user, access_token }),
    ))
}

async fn session_parts(
    state: &UsersState,
    session: Session,
) -> Result<(String, UserProfile, String), ApiError> {
    let profile = state
        .db
        .library()
        .profile(&session.user)
        .await
        .db_err("Failed to load profile")?;
    let cookie = refresh_cookie(&session.refresh_token.token);
    Ok((cookie, profile, session.access_token.token))
}

/// Rotate the refresh cookie. Every failure also clears it.
async fn refresh(State(state): State<UsersState>, RefreshCookie(cookie): RefreshCookie) -> Response {
    match state.sessions.refresh(cookie.as_deref()).await {
        Ok(tokens) => (
            [(header::SET_COOKIE, refresh_cookie(&tokens.refresh_token.token))],
            Json(AccessTokenResponse {
                access_token: tokens.access_token.token,
            }),
        )
            .into_response(),
        Err(e) => ([(header::SET_COOKIE, clear_refresh_cookie())], ApiError::from(e)).into_response(),
    }
}

async fn logout(
    State(state): State<UsersState>,
    _auth: Auth,
    RefreshCookie(cookie): RefreshCookie,
) -> Result<Response, ApiError> {
    let Some(cookie) = cookie else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    state.sessions.logout(Some(&cookie)).await?;

    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_refresh_cookie())],
    )
        .into_response())
}

async fn get_user(
    State(state): State<UsersState>,
    _auth: Auth,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .users()
        .get_by_uuid(&id)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::not_found(format!("User ID {} not found", id)))?;

    let profile = state
        .db
        .library()
        .profile(&user)
        .await
        .db_err("Failed to load profile")?;

    Ok(Json(profile))
}

async fn update_user_info(
    State(state): State<UsersState>,
    auth: Auth,
    ApiJson(payload): ApiJson<UpdateInfoRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(SessionError::MissingName.into());
    }

    state
        .db
        .users()
        .update_name(auth.user.id, name)
        .await
        .db_err("Failed to update name")?;

    let user = User {
        name: name.to_string(),
        ..auth.user
    };
    Ok(Json(with_access_token(&state.db, &state.issuer, &user).await?))
}

async fn update_user_password(
    State(state): State<UsersState>,
    auth: Auth,
    ApiJson(payload): ApiJson<UpdatePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .sessions
        .change_password(&auth.user, &payload.old_password, &payload.new_password)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(with_access_token(&state.db, &state.issuer, &auth.user).await?),
    ))
}

/// Build the profile response that also hands out a new access token.
pub(super) async fn with_access_token(
    db: &Database,
    issuer: &TokenIssuer,
    user: &User,
) -> Result<UserWithTokenResponse, ApiError> {
    let user_profile = db
        .library()
        .profile(user)
        .await
        .db_err("Failed to load profile")?;
    let access = issuer
        .issue_access_token(&user.uuid)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok(UserWithTokenResponse {
        user: user_profile,
        access_token: access.token,
    })
}
