//! Axum extractors for authentication.

use std::convert::Infallible;
use std::marker::PhantomData;

use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use tracing::{debug, error};

use super::cookie::{REFRESH_COOKIE_NAME, get_cookie};
use super::errors::{ApiAuthError, AuthErrorKind};
use super::state::HasAuthBackend;
use crate::db::{User, UserRole};
use crate::jwt::Claims;

/// Role requirement checked by [`Auth`] after the user is resolved.
pub trait RoleConstraint: Send + Sync {
    fn allows(role: UserRole) -> bool;
}

/// Any authenticated user.
pub struct AnyRole;

impl RoleConstraint for AnyRole {
    fn allows(_role: UserRole) -> bool {
        true
    }
}

/// Administrators only.
pub struct AdminOnly;

impl RoleConstraint for AdminOnly {
    fn allows(role: UserRole) -> bool {
        role == UserRole::Admin
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

/// Extractor for endpoints that require a valid access token.
///
/// Verifies the bearer token, then loads the user it names, so handlers
/// always see the current record (role changes apply immediately).
pub struct Auth<R: RoleConstraint = AnyRole> {
    pub claims: Claims,
    pub user: User,
    _role: PhantomData<R>,
}

impl<S, R> FromRequestParts<S> for Auth<R>
where
    S: HasAuthBackend + Send + Sync,
    R: RoleConstraint,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or(ApiAuthError::new(AuthErrorKind::MissingToken))?;

        let claims = state.issuer().verify_access_token(token).map_err(|e| {
            debug!(error = %e, "Rejected access token");
            ApiAuthError::new(AuthErrorKind::InvalidToken)
        })?;

        let user = state
            .db()
            .users()
            .get_by_uuid(&claims.id)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to load authenticated user");
                ApiAuthError::new(AuthErrorKind::DatabaseError)
            })?
            .ok_or(ApiAuthError::new(AuthErrorKind::UserNotFound))?;

        if !R::allows(user.role) {
            return Err(ApiAuthError::new(AuthErrorKind::InsufficientRole));
        }

        Ok(Self {
            claims,
            user,
            _role: PhantomData,
        })
    }
}

/// The refresh token cookie, if the request carried one. Never rejects.
pub struct RefreshCookie(pub Option<String>);

impl<S> FromRequestParts<S> for RefreshCookie
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(RefreshCookie(
            get_cookie(&parts.headers, REFRESH_COOKIE_NAME)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
        ))
    }
}
