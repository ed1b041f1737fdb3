//! Refresh token storage.
//!
//! Each row is one currently valid refresh token for one session. Every
//! mutation is a single statement or a transaction that starts with a write,
//! so the find-and-modify steps of rotation cannot interleave between
//! concurrent requests. Consuming a token is always its own committed
//! statement. Access tokens are stateless and never stored.

use sqlx::sqlite::SqlitePool;

/// Owner of a stored refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenOwner {
    pub user_id: i64,
    pub uuid: String,
}

/// What happened to a user's token set during login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginRotation {
    /// No session cookie was presented; the new token was appended.
    NewDevice,
    /// The presented cookie was one of the user's tokens and was replaced.
    KnownDevice,
    /// The presented cookie was not among the user's tokens, so all of them
    /// were dropped before the new token was appended.
    UnknownDevice { cleared: u64 },
}

/// Store for the per-user set of valid refresh tokens.
pub struct RefreshTokenStore {
    pool: SqlitePool,
}

impl RefreshTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a refresh token to a user's set.
    pub async fn add(&self, user_id: i64, token: &str, expires_at: i64) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO refresh_tokens (token, user_id, expires_at) VALUES (?, ?, ?)")
            .bind(token)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Find the user currently holding this exact token.
    pub async fn find_owner(&self, token: &str) -> Result<Option<TokenOwner>, sqlx::Error> {
        let row: Option<(i64, String)> = sqlx::query_as(
            "SELECT u.id, u.uuid FROM refresh_tokens t JOIN users u ON u.id = t.user_id WHERE t.token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(user_id, uuid)| TokenOwner { user_id, uuid }))
    }

    /// List a user's tokens in the order they were added.
    pub async fn list_by_user(&self, user_id: i64) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT token FROM refresh_tokens WHERE user_id = ? ORDER BY id")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(token,)| token).collect())
    }

    /// Remove a token wherever it is. Returns the owner's user ID if it was present.
    pub async fn find_and_remove(&self, token: &str) -> Result<Option<i64>, sqlx::Error> {
        let row: Option<(i64,)> =
            sqlx::query_as("DELETE FROM refresh_tokens WHERE token = ? RETURNING user_id")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(user_id,)| user_id))
    }

    /// Replace `old` with `new` in a user's set.
    ///
    /// Returns false, changing nothing, if `old` is no longer held by the user.
    /// Of two concurrent calls with the same `old`, at most one returns true.
    ///
    /// The removal commits on its own before the insert, so a failed insert
    /// still leaves `old` consumed.
    pub async fn find_and_replace(
        &self,
        user_id: i64,
        old: &str,
        new: &str,
        expires_at: i64,
    ) -> Result<bool, sqlx::Error> {
        let removed: Option<(i64,)> = sqlx::query_as(
            "DELETE FROM refresh_tokens WHERE token = ? AND user_id = ? RETURNING id",
        )
        .bind(old)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        if removed.is_none() {
            return Ok(false);
        }

        self.add(user_id, new, expires_at).await?;
        Ok(true)
    }

    /// Install a login's new refresh token.
    ///
    /// A presented cookie that belongs to the user is replaced in place of a
    /// blind append. A presented cookie the user does not hold means the set
    /// can no longer be trusted, so it is emptied first.
    pub async fn rotate_on_login(
        &self,
        user_id: i64,
        presented: Option<&str>,
        new: &str,
        expires_at: i64,
    ) -> Result<LoginRotation, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let rotation = match presented {
            None => LoginRotation::NewDevice,
            Some(old) => {
                let removed =
                    sqlx::query("DELETE FROM refresh_tokens WHERE token = ? AND user_id = ?")
                        .bind(old)
                        .bind(user_id)
                        .execute(&mut *tx)
                        .await?;

                if removed.rows_affected() > 0 {
                    LoginRotation::KnownDevice
                } else {
                    let cleared = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ?")
                        .bind(user_id)
                        .execute(&mut *tx)
                        .await?;
                    LoginRotation::UnknownDevice {
                        cleared: cleared.rows_affected(),
                    }
                }
            }
        };

        sqlx::query("INSERT INTO refresh_tokens (token, user_id, expires_at) VALUES (?, ?, ?)")
            .bind(new)
            .bind(user_id)
            .bind(expires_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(rotation)
    }

    /// Delete all tokens for a user (every session ends).
    pub async fn clear_for_user(&self, user_id: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Delete all tokens whose signed expiry has passed.
    pub async fn delete_expired(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM refresh_tokens WHERE expires_at < CAST(strftime('%s', 'now') AS INTEGER)",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;

    use super::*;

    async fn setup() -> (Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let id = db
            .users()
            .create("uuid-1", "Alice", "alice@example.com", None)
            .await
            .unwrap();
        (db, id)
    }

    const FAR_FUTURE: i64 = 4_000_000_000;

    #[tokio::test]
    async fn test_find_and_replace_appends_new_token() {
        let (db, id) = setup().await;
        db.tokens().add(id, "a", FAR_FUTURE).await.unwrap();
        db.tokens().add(id, "b", FAR_FUTURE).await.unwrap();

        let replaced = db
            .tokens()
            .find_and_replace(id, "a", "c", FAR_FUTURE)
            .await
            .unwrap();

        assert!(replaced);
        assert_eq!(db.tokens().list_by_user(id).await.unwrap(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_find_and_replace_missing_token_is_noop() {
        let (db, id) = setup().await;
        db.tokens().add(id, "a", FAR_FUTURE).await.unwrap();

        let replaced = db
            .tokens()
            .find_and_replace(id, "gone", "c", FAR_FUTURE)
            .await
            .unwrap();

        assert!(!replaced);
        assert_eq!(db.tokens().list_by_user(id).await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_find_and_replace_requires_matching_owner() {
        let (db, alice) = setup().await;
        let bob = db
            .users()
            .create("uuid-2", "Bob", "bob@example.com", None)
            .await
            .unwrap();
        db.tokens().add(alice, "a", FAR_FUTURE).await.unwrap();

        let replaced = db
            .tokens()
            .find_and_replace(bob, "a", "c", FAR_FUTURE)
            .await
            .unwrap();

        assert!(!replaced);
        assert_eq!(db.tokens().list_by_user(alice).await.unwrap(), vec!["a"]);
        assert!(db.tokens().list_by_user(bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_and_replace_failed_insert_keeps_removal() {
        let (db, id) = setup().await;
        db.tokens().add(id, "a", FAR_FUTURE).await.unwrap();
        sqlx::query(
            "CREATE TRIGGER reject_tokens BEFORE INSERT ON refresh_tokens
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let result = db.tokens().find_and_replace(id, "a", "b", FAR_FUTURE).await;

        assert!(result.is_err());
        assert!(db.tokens().list_by_user(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rotate_on_login_known_device() {
        let (db, id) = setup().await;
        db.tokens().add(id, "a", FAR_FUTURE).await.unwrap();
        db.tokens().add(id, "b", FAR_FUTURE).await.unwrap();

        let rotation = db
            .tokens()
            .rotate_on_login(id, Some("a"), "c", FAR_FUTURE)
            .await
            .unwrap();

        assert_eq!(rotation, LoginRotation::KnownDevice);
        assert_eq!(db.tokens().list_by_user(id).await.unwrap(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_rotate_on_login_unknown_device_clears_set() {
        let (db, id) = setup().await;
        db.tokens().add(id, "a", FAR_FUTURE).await.unwrap();
        db.tokens().add(id, "b", FAR_FUTURE).await.unwrap();

        let rotation = db
            .tokens()
            .rotate_on_login(id, Some("stale"), "c", FAR_FUTURE)
            .await
            .unwrap();

        assert_eq!(rotation, LoginRotation::UnknownDevice { cleared: 2 });
        assert_eq!(db.tokens().list_by_user(id).await.unwrap(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_find_and_remove() {
        let (db, id) = setup().await;
        db.tokens().add(id, "a", FAR_FUTURE).await.unwrap();

        assert_eq!(db.tokens().find_and_remove("a").await.unwrap(), Some(id));
        assert_eq!(db.tokens().find_and_remove("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_expired() {
        let (db, id) = setup().await;
        db.tokens().add(id, "old", 1).await.unwrap();
        db.tokens().add(id, "fresh", FAR_FUTURE).await.unwrap();

        assert_eq!(db.tokens().delete_expired().await.unwrap(), 1);
        assert_eq!(db.tokens().list_by_user(id).await.unwrap(), vec!["fresh"]);
    }
}
