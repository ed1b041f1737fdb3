//! Session rotation engine.
//!
//! Owns the refresh token lifecycle: issuing a token pair on login or social
//! sign-in, rotating the refresh token on every use, and revoking every
//! session of a user when a consumed refresh token is presented again.
//!
//! A presented refresh cookie is in one of four states:
//!
//! | state                        | store lookup | signature | outcome                   |
//! |------------------------------|--------------|-----------|---------------------------|
//! | absent                       | -            | -         | 401                       |
//! | current                      | found        | valid     | rotated                   |
//! | revoked (reuse)              | not found    | valid     | all sessions cleared, 403 |
//! | forged, expired or garbage   | either       | invalid   | 403                       |

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::db::{Database, LoginRotation, User};
use crate::jwt::{IssuedToken, JwtError, TokenIssuer};
use crate::password::{self, MIN_PASSWORD_LEN, PasswordError};

/// A freshly started session.
#[derive(Debug)]
pub struct Session {
    pub user: User,
    pub access_token: IssuedToken,
    pub refresh_token: IssuedToken,
}

/// Result of a successful refresh.
#[derive(Debug)]
pub struct RotatedTokens {
    pub access_token: IssuedToken,
    pub refresh_token: IssuedToken,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Please enter your name")]
    MissingName,
    #[error("Please enter your email and password")]
    MissingCredentials,
    #[error("Please enter a valid email")]
    InvalidEmail,
    #[error("Password must be at least 6 characters")]
    WeakPassword,
    #[error("Email already exist!")]
    EmailTaken,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Please enter old and new password")]
    MissingPasswords,
    #[error("Invalid old password")]
    WrongOldPassword,
    #[error("Unauthorized: No refresh token provided")]
    NoRefreshToken,
    #[error("Forbidden: Possible token misuse detected")]
    TokenReuse,
    #[error("Forbidden: Refresh token not found")]
    TokenNotFound,
    #[error("Forbidden: Refresh token verification failed")]
    VerificationFailed,
    #[error("Forbidden: User mismatch")]
    SubjectMismatch,
    #[error(transparent)]
    Jwt(#[from] JwtError),
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email pattern"));

/// Check an email address against the accepted shape `local@domain.tld`.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

fn expiry(token: &IssuedToken) -> i64 {
    i64::try_from(token.expires_at).unwrap_or(i64::MAX)
}

pub struct SessionEngine {
    db: Database,
    issuer: Arc<TokenIssuer>,
    bcrypt_cost: u32,
}

impl SessionEngine {
    pub fn new(db: Database, issuer: Arc<TokenIssuer>, bcrypt_cost: u32) -> Self {
        Self {
            db,
            issuer,
            bcrypt_cost,
        }
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Create a password account. Does not start a session.
    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<User, SessionError> {
        let name = name.trim();
        let email = email.trim();

        if name.is_empty() {
            return Err(SessionError::MissingName);
        }
        if email.is_empty() || password.is_empty() {
            return Err(SessionError::MissingCredentials);
        }
        if !is_valid_email(email) {
            return Err(SessionError::InvalidEmail);
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(SessionError::WeakPassword);
        }

        if !self.db.users().is_email_available(email).await? {
            return Err(SessionError::EmailTaken);
        }

        let hash = password::hash_password(password, self.bcrypt_cost).await?;
        let uuid = uuid::Uuid::new_v4().to_string();

        // The availability check can race another registration; the unique
        // index settles it.
        let id = match self.db.users().create(&uuid, name, email, Some(&hash)).await {
            Ok(id) => id,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(SessionError::EmailTaken);
            }
            Err(e) => return Err(e.into()),
        };

        let user = self
            .db
            .users()
            .get_by_id(id)
            .await?
            .ok_or(SessionError::Database(sqlx::Error::RowNotFound))?;

        info!(user_id = %user.uuid, "Registered new user");
        Ok(user)
    }

    /// Password login. `presented` is the refresh cookie sent with the request, if any.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        presented: Option<&str>,
    ) -> Result<Session, SessionError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(SessionError::MissingCredentials);
        }

        let user = self
            .db
            .users()
            .get_by_email(email)
            .await?
            .ok_or(SessionError::InvalidCredentials)?;

        // Social-only accounts have no password to match.
        let hash = self
            .db
            .users()
            .get_password_hash(user.id)
            .await?
            .ok_or(SessionError::InvalidCredentials)?;

        if !password::verify_password(password, &hash).await? {
            return Err(SessionError::InvalidCredentials);
        }

        self.start_session(user, presented).await
    }

    /// Sign in with an identity asserted by an external provider, creating
    /// the account on first use.
    pub async fn social_sign_in(
        &self,
        email: &str,
        name: &str,
        avatar_url: Option<&str>,
        presented: Option<&str>,
    ) -> Result<Session, SessionError> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(SessionError::InvalidEmail);
        }
        let name = match name.trim() {
            "" => email.split('@').next().unwrap_or(email),
            name => name,
        };

        let uuid = uuid::Uuid::new_v4().to_string();
        let user = self
            .db
            .users()
            .find_or_create_social(&uuid, name, email, avatar_url)
            .await?;

        self.start_session(user, presented).await
    }

    async fn start_session(
        &self,
        user: User,
        presented: Option<&str>,
    ) -> Result<Session, SessionError> {
        let access_token = self.issuer.issue_access_token(&user.uuid)?;
        let refresh_token = self.issuer.issue_refresh_token(&user.uuid)?;

        let rotation = self
            .db
            .tokens()
            .rotate_on_login(user.id, presented, &refresh_token.token, expiry(&refresh_token))
            .await?;

        match rotation {
            LoginRotation::NewDevice => debug!(user_id = %user.uuid, "Session started"),
            LoginRotation::KnownDevice => {
                debug!(user_id = %user.uuid, "Session replaced on known device")
            }
            LoginRotation::UnknownDevice { cleared } => {
                warn!(user_id = %user.uuid, cleared, "Login presented an unknown refresh token; sessions reset")
            }
        }

        Ok(Session {
            user,
            access_token,
            refresh_token,
        })
    }

    /// Exchange a refresh token for a new token pair.
    pub async fn refresh(&self, presented: Option<&str>) -> Result<RotatedTokens, SessionError> {
        let presented = presented
            .filter(|t| !t.is_empty())
            .ok_or(SessionError::NoRefreshToken)?;

        let Some(owner) = self.db.tokens().find_owner(presented).await? else {
            return Err(self.handle_unknown_token(presented).await?);
        };

        let claims = match self.issuer.verify_refresh_token(presented) {
            Ok(claims) => claims,
            Err(e) => {
                self.db.tokens().find_and_remove(presented).await?;
                debug!(user_id = %owner.uuid, error = %e, "Dropped refresh token that failed verification");
                return Err(SessionError::VerificationFailed);
            }
        };

        if claims.id != owner.uuid {
            warn!(user_id = %owner.uuid, subject = %claims.id, "Refresh token subject does not match its owner");
            return Err(SessionError::SubjectMismatch);
        }

        let access_token = self.issuer.issue_access_token(&owner.uuid)?;
        let refresh_token = self.issuer.issue_refresh_token(&owner.uuid)?;

        let replaced = self
            .db
            .tokens()
            .find_and_replace(
                owner.user_id,
                presented,
                &refresh_token.token,
                expiry(&refresh_token),
            )
            .await?;

        if !replaced {
            // Consumed by a concurrent refresh between lookup and replace.
            debug!(user_id = %owner.uuid, "Refresh token already rotated");
            return Err(SessionError::TokenNotFound);
        }

        Ok(RotatedTokens {
            access_token,
            refresh_token,
        })
    }

    /// A token absent from the store that still verifies was issued by us and
    /// already consumed, so whoever holds it is replaying it.
    async fn handle_unknown_token(&self, presented: &str) -> Result<SessionError, SessionError> {
        let Ok(claims) = self.issuer.verify_refresh_token(presented) else {
            return Ok(SessionError::TokenNotFound);
        };

        match self.db.users().get_by_uuid(&claims.id).await? {
            Some(user) => {
                let cleared = self.db.tokens().clear_for_user(user.id).await?;
                warn!(user_id = %user.uuid, cleared, "Refresh token reuse detected; all sessions revoked");
            }
            None => {
                warn!(subject = %claims.id, "Refresh token reuse detected for unknown user");
            }
        }

        Ok(SessionError::TokenReuse)
    }

    /// End the session tied to `presented`. Unknown or missing tokens are not an error.
    pub async fn logout(&self, presented: Option<&str>) -> Result<(), SessionError> {
        let Some(presented) = presented.filter(|t| !t.is_empty()) else {
            return Ok(());
        };

        if let Some(user_id) = self.db.tokens().find_and_remove(presented).await? {
            debug!(user_id, "Session ended");
        }
        Ok(())
    }

    /// Change a user's password after checking the current one.
    pub async fn change_password(
        &self,
        user: &User,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), SessionError> {
        if old_password.is_empty() || new_password.is_empty() {
            return Err(SessionError::MissingPasswords);
        }

        let hash = self
            .db
            .users()
            .get_password_hash(user.id)
            .await?
            .ok_or(SessionError::WrongOldPassword)?;

        if !password::verify_password(old_password, &hash).await? {
            return Err(SessionError::WrongOldPassword);
        }
        if new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(SessionError::WeakPassword);
        }

        let new_hash = password::hash_password(new_password, self.bcrypt_cost).await?;
        self.db
            .users()
            .update_password_hash(user.id, &new_hash)
            .await?;

        info!(user_id = %user.uuid, "Password changed");
        Ok(())
    }
}
