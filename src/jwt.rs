//! JWT token generation and validation.
//!
//! Access and refresh tokens are signed with two distinct HS256 secrets, so a
//! token of one kind never validates as the other even before the `typ` claim
//! is checked.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Short-lived bearer token, verified statelessly
    Access,
    /// Long-lived cookie token, also checked against the credential store
    Refresh,
}

/// Claims carried by both token kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user UUID)
    pub id: String,
    /// Token type
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Random token id, keeps tokens minted in the same second distinct
    pub jti: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Default access token lifetime: 5 minutes
pub const ACCESS_TOKEN_DURATION_SECS: u64 = 5 * 60;

/// Default refresh token lifetime: 24 hours
pub const REFRESH_TOKEN_DURATION_SECS: u64 = 24 * 60 * 60;

/// A freshly signed token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The JWT token string
    pub token: String,
    /// Issued at timestamp (Unix seconds)
    pub issued_at: u64,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: u64,
}

#[derive(Clone)]
struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

/// Signs and verifies access and refresh tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    access: KeyPair,
    refresh: KeyPair,
    access_ttl: u64,
    refresh_ttl: u64,
}

impl TokenIssuer {
    /// Create an issuer with the default lifetimes.
    ///
    /// Fails if either secret is empty or both are the same.
    pub fn new(access_secret: &[u8], refresh_secret: &[u8]) -> Result<Self, JwtError> {
        Self::with_ttls(
            access_secret,
            refresh_secret,
            ACCESS_TOKEN_DURATION_SECS,
            REFRESH_TOKEN_DURATION_SECS,
        )
    }

    pub fn with_ttls(
        access_secret: &[u8],
        refresh_secret: &[u8],
        access_ttl: u64,
        refresh_ttl: u64,
    ) -> Result<Self, JwtError> {
        if access_secret.is_empty() || refresh_secret.is_empty() {
            return Err(JwtError::EmptySecret);
        }
        if access_secret == refresh_secret {
            return Err(JwtError::SharedSecret);
        }

        Ok(Self {
            access: KeyPair::new(access_secret),
            refresh: KeyPair::new(refresh_secret),
            access_ttl,
            refresh_ttl,
        })
    }

    pub fn access_ttl(&self) -> u64 {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> u64 {
        self.refresh_ttl
    }

    /// Sign an access token for the given subject.
    pub fn issue_access_token(&self, subject_id: &str) -> Result<IssuedToken, JwtError> {
        self.issue(subject_id, TokenType::Access)
    }

    /// Sign a refresh token for the given subject.
    pub fn issue_refresh_token(&self, subject_id: &str) -> Result<IssuedToken, JwtError> {
        self.issue(subject_id, TokenType::Refresh)
    }

    fn issue(&self, subject_id: &str, token_type: TokenType) -> Result<IssuedToken, JwtError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| JwtError::TimeError)?
            .as_secs();

        let (keys, ttl) = match token_type {
            TokenType::Access => (&self.access, self.access_ttl),
            TokenType::Refresh => (&self.refresh, self.refresh_ttl),
        };
        let exp = now + ttl;

        let claims = Claims {
            id: subject_id.to_string(),
            token_type,
            jti: uuid::Uuid::new_v4().to_string(),
            iat: now,
            exp,
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
            .map_err(JwtError::Encoding)?;

        Ok(IssuedToken {
            token,
            issued_at: now,
            expires_at: exp,
        })
    }

    /// Validate and decode an access token.
    pub fn verify_access_token(&self, token: &str) -> Result<Claims, JwtError> {
        self.verify(token, TokenType::Access)
    }

    /// Validate and decode a refresh token. Does not consult the store.
    pub fn verify_refresh_token(&self, token: &str) -> Result<Claims, JwtError> {
        self.verify(token, TokenType::Refresh)
    }

    /// Validate a token of the given kind: signature, expiry and `typ`.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<Claims, JwtError> {
        let keys = match expected {
            TokenType::Access => &self.access,
            TokenType::Refresh => &self.refresh,
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let token_data = jsonwebtoken::decode::<Claims>(token, &keys.decoding, &validation)
            .map_err(JwtError::Decoding)?;

        if token_data.claims.token_type != expected {
            return Err(JwtError::WrongTokenType);
        }

        Ok(token_data.claims)
    }
}

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Failed to encode token: {0}")]
    Encoding(jsonwebtoken::errors::Error),
    #[error("Failed to decode token: {0}")]
    Decoding(jsonwebtoken::errors::Error),
    #[error("System time error")]
    TimeError,
    #[error("Wrong token type")]
    WrongTokenType,
    #[error("Token secrets must not be empty")]
    EmptySecret,
    #[error("Access and refresh token secrets must differ")]
    SharedSecret,
}
