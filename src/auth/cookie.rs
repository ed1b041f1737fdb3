//! Refresh token cookie handling.

use axum::http::{HeaderMap, header};

/// Cookie name for the refresh token.
pub const REFRESH_COOKIE_NAME: &str = "jwt";

/// Lifetime of the refresh cookie. Independent of the refresh token's own expiry.
pub const REFRESH_COOKIE_MAX_AGE_SECS: u64 = 24 * 60 * 60;

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            if key.trim() == name {
                return Some(value.trim());
            }
        }
    }
    None
}

/// `Set-Cookie` value installing a refresh token.
///
/// `SameSite=None` lets the frontend call the API cross-site, which in turn
/// requires `Secure`.
pub fn refresh_cookie(token: &str) -> String {
    format!(
        "{}={}; HttpOnly; Secure; SameSite=None; Path=/; Max-Age={}",
        REFRESH_COOKIE_NAME, token, REFRESH_COOKIE_MAX_AGE_SECS
    )
}

/// `Set-Cookie` value removing the refresh token.
pub fn clear_refresh_cookie() -> String {
    format!(
        "{}=; HttpOnly; Secure; SameSite=None; Path=/; Max-Age=0",
        REFRESH_COOKIE_NAME
    )
}
