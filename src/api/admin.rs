//! Admin API endpoints.

use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, put},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ResultExt};
use super::json::ApiJson;
use crate::auth::{AdminOnly, Auth};
use crate::db::{Database, User, UserRole};
use crate::impl_has_auth_backend;
use crate::jwt::TokenIssuer;

#[derive(Clone)]
pub struct AdminState {
    pub db: Database,
    pub issuer: Arc<TokenIssuer>,
}

impl_has_auth_backend!(AdminState);

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/{id}/role", put(set_role))
        .with_state(state)
}

/// List all users.
async fn list_users(
    State(state): State<AdminState>,
    _auth: Auth<AdminOnly>,
) -> Result<impl IntoResponse, ApiError> {
    let users = state
        .db
        .users()
        .list_all()
        .await
        .db_err("Failed to list users")?;

    let mut profiles = Vec::with_capacity(users.len());
    for user in &users {
        profiles.push(
            state
                .db
                .library()
                .profile(user)
                .await
                .db_err("Failed to load profile")?,
        );
    }

    Ok(Json(profiles))
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct SetRoleRequest {
    role: String,
}

async fn set_role(
    State(state): State<AdminState>,
    auth: Auth<AdminOnly>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<SetRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let role = match payload.role.as_str() {
        "user" => UserRole::User,
        "admin" => UserRole::Admin,
        _ => return Err(ApiError::bad_request("Role must be 'user' or 'admin'")),
    };

    if id == auth.user.uuid {
        return Err(ApiError::bad_request("Cannot change your own role"));
    }

    let target = state
        .db
        .users()
        .get_by_uuid(&id)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::not_found(format!("User ID {} not found", id)))?;

    state
        .db
        .users()
        .set_role(target.id, role)
        .await
        .db_err("Failed to set role")?;

    info!(user_id = %target.uuid, role = role.as_str(), by = %auth.user.uuid, "Role changed");

    let profile = state
        .db
        .library()
        .profile(&User { role, ..target })
        .await
        .db_err("Failed to load profile")?;

    Ok(Json(profile))
}
