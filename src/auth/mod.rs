//! Bearer-token authentication with role-based access control.
//!
//! Access tokens travel in the `Authorization` header and are verified
//! statelessly. The refresh token lives in the HTTP-only `jwt` cookie and is
//! only ever read by the session endpoints.

mod cookie;
mod errors;
mod extractors;
mod ip;
mod state;

pub use cookie::{
    REFRESH_COOKIE_MAX_AGE_SECS, REFRESH_COOKIE_NAME, clear_refresh_cookie, get_cookie,
    refresh_cookie,
};
pub use errors::ApiAuthError;
pub use extractors::{AdminOnly, AnyRole, Auth, RefreshCookie, RoleConstraint, bearer_token};
pub use ip::extract_client_ip;
pub use state::HasAuthBackend;
