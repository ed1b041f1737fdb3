//! Authentication state trait and macro.

use crate::db::Database;
use crate::jwt::TokenIssuer;

/// Trait for state types that provide the database and token issuer for authentication.
pub trait HasAuthBackend {
    fn issuer(&self) -> &TokenIssuer;
    fn db(&self) -> &Database;
}

/// Macro to implement `HasAuthBackend` for state structs with the standard fields.
///
/// The struct must have these fields:
/// - `issuer: Arc<TokenIssuer>`
/// - `db: Database`
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn issuer(&self) -> &$crate::jwt::TokenIssuer {
                &self.issuer
            }
            fn db(&self) -> &$crate::db::Database {
                &self.db
            }
        }
    };
}
