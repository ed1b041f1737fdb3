//! Rate limiting for authentication endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down credential
//! stuffing and signup spam.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};

use crate::api::ApiError;
use crate::auth::extract_client_ip;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Default number of authentication attempts per IP and minute.
pub const DEFAULT_AUTH_RATE_PER_MINUTE: u32 = 20;

/// Rate limiting configuration for authentication endpoints.
pub struct RateLimitConfig {
    /// Per-IP limiter shared by register, login and social sign-in
    pub auth: IpLimiter,
    /// Take the client IP from `X-Forwarded-For`
    pub trust_proxy: bool,
}

impl RateLimitConfig {
    /// A zero rate is treated as one request per minute.
    pub fn new(per_minute: u32, trust_proxy: bool) -> Self {
        let per_minute = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            auth: RateLimiter::keyed(Quota::per_minute(per_minute)),
            trust_proxy,
        }
    }

    /// Forget clients whose buckets have refilled. Returns the number still tracked.
    pub fn prune(&self) -> usize {
        self.auth.retain_recent();
        self.auth.shrink_to_fit();
        self.auth.len()
    }
}

/// Middleware for rate limiting authentication endpoints.
pub async fn rate_limit_auth(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(ip) = extract_client_ip(&request, config.trust_proxy) else {
        return ApiError::forbidden("Unable to determine client IP.").into_response();
    };

    match config.auth.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!(ip = %ip, "Authentication rate limit exceeded");
            ApiError::too_many_requests("Too many authentication attempts. Please try again later.")
                .into_response()
        }
    }
}
