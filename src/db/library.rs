//! Followed movies and watch history.

use serde::Serialize;
use sqlx::sqlite::SqlitePool;

use super::user::{Avatar, User, UserRole};

/// Watch progress for one movie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub movie_slug: String,
    pub lasted_ep: String,
    pub watched_eps: Vec<String>,
}

/// Public view of a user, as returned by the API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar: Avatar,
    pub role: UserRole,
    pub followed_movie: Vec<String>,
    pub history: Vec<HistoryEntry>,
}

/// Fold a newly watched episode into a movie's history entry.
///
/// `lasted_ep` only moves forward: when both episodes are numeric the larger
/// one wins, otherwise the newest one is taken. `watched_eps` keeps first-seen
/// order without duplicates.
pub fn merge_history(existing: Option<HistoryEntry>, movie_slug: &str, ep: &str) -> HistoryEntry {
    let Some(mut entry) = existing else {
        return HistoryEntry {
            movie_slug: movie_slug.to_string(),
            lasted_ep: ep.to_string(),
            watched_eps: vec![ep.to_string()],
        };
    };

    let advance = match (entry.lasted_ep.parse::<f64>(), ep.parse::<f64>()) {
        (Ok(current), Ok(new)) => new > current,
        _ => true,
    };
    if advance {
        entry.lasted_ep = ep.to_string();
    }

    if !entry.watched_eps.iter().any(|e| e == ep) {
        entry.watched_eps.push(ep.to_string());
    }

    entry
}

pub struct LibraryStore {
    pool: SqlitePool,
}

impl LibraryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Follow a movie. Returns false if it was already followed.
    pub async fn follow(&self, user_id: i64, slug: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO followed_movies (user_id, slug) VALUES (?, ?)
             ON CONFLICT(user_id, slug) DO NOTHING",
        )
        .bind(user_id)
        .bind(slug)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Unfollow a movie. Returns false if it was not followed.
    pub async fn unfollow(&self, user_id: i64, slug: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM followed_movies WHERE user_id = ? AND slug = ?")
            .bind(user_id)
            .bind(slug)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn followed(&self, user_id: i64) -> Result<Vec<String>, sqlx::Error> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT slug FROM followed_movies WHERE user_id = ? ORDER BY id")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(slug,)| slug).collect())
    }

    pub async fn history(&self, user_id: i64) -> Result<Vec<HistoryEntry>, sqlx::Error> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT movie_slug, lasted_ep, watched_eps FROM watch_history WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(movie_slug, lasted_ep, watched_eps)| {
                Ok(HistoryEntry {
                    movie_slug,
                    lasted_ep,
                    watched_eps: decode_eps(&watched_eps)?,
                })
            })
            .collect()
    }

    /// Record that an episode was watched.
    pub async fn record_history(
        &self,
        user_id: i64,
        movie_slug: &str,
        ep: &str,
    ) -> Result<HistoryEntry, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // Claim the row first so the read-merge-write below holds the write lock.
        let inserted = sqlx::query(
            "INSERT INTO watch_history (user_id, movie_slug, lasted_ep, watched_eps) VALUES (?, ?, ?, '[]')
             ON CONFLICT(user_id, movie_slug) DO NOTHING",
        )
        .bind(user_id)
        .bind(movie_slug)
        .bind(ep)
        .execute(&mut *tx)
        .await?;

        let existing = if inserted.rows_affected() > 0 {
            None
        } else {
            let (lasted_ep, watched_eps): (String, String) = sqlx::query_as(
                "SELECT lasted_ep, watched_eps FROM watch_history WHERE user_id = ? AND movie_slug = ?",
            )
            .bind(user_id)
            .bind(movie_slug)
            .fetch_one(&mut *tx)
            .await?;
            Some(HistoryEntry {
                movie_slug: movie_slug.to_string(),
                lasted_ep,
                watched_eps: decode_eps(&watched_eps)?,
            })
        };

        let entry = merge_history(existing, movie_slug, ep);
        let encoded = serde_json::Value::from(entry.watched_eps.clone()).to_string();

        sqlx::query(
            "UPDATE watch_history SET lasted_ep = ?, watched_eps = ? WHERE user_id = ? AND movie_slug = ?",
        )
        .bind(&entry.lasted_ep)
        .bind(encoded)
        .bind(user_id)
        .bind(movie_slug)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(entry)
    }

    /// Assemble the public profile of a user.
    pub async fn profile(&self, user: &User) -> Result<UserProfile, sqlx::Error> {
        Ok(UserProfile {
            id: user.uuid.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            avatar: user.avatar.clone(),
            role: user.role,
            followed_movie: self.followed(user.id).await?,
            history: self.history(user.id).await?,
        })
    }
}

fn decode_eps(raw: &str) -> Result<Vec<String>, sqlx::Error> {
    serde_json::from_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

#[cfg(test)]
mod tests {
    use crate::db::Database;

    use super::*;

    #[test]
    fn test_merge_history_keeps_highest_numeric_episode() {
        let entry = merge_history(None, "movie", "3");
        let entry = merge_history(Some(entry), "movie", "1");
        let entry = merge_history(Some(entry), "movie", "5");
        let entry = merge_history(Some(entry), "movie", "3");

        assert_eq!(entry.lasted_ep, "5");
        assert_eq!(entry.watched_eps, vec!["3", "1", "5"]);
    }

    #[test]
    fn test_merge_history_non_numeric_takes_latest() {
        let entry = merge_history(None, "movie", "full");
        let entry = merge_history(Some(entry), "movie", "trailer");

        assert_eq!(entry.lasted_ep, "trailer");
        assert_eq!(entry.watched_eps, vec!["full", "trailer"]);
    }

    #[tokio::test]
    async fn test_follow_and_unfollow() {
        let db = Database::open(":memory:").await.unwrap();
        let id = db
            .users()
            .create("uuid-1", "Alice", "alice@example.com", None)
            .await
            .unwrap();

        assert!(db.library().follow(id, "dune").await.unwrap());
        assert!(db.library().follow(id, "alien").await.unwrap());
        assert!(!db.library().follow(id, "dune").await.unwrap());
        assert_eq!(db.library().followed(id).await.unwrap(), vec!["dune", "alien"]);

        assert!(db.library().unfollow(id, "dune").await.unwrap());
        assert!(!db.library().unfollow(id, "dune").await.unwrap());
        assert_eq!(db.library().followed(id).await.unwrap(), vec!["alien"]);
    }

    #[tokio::test]
    async fn test_record_history_persists_merge() {
        let db = Database::open(":memory:").await.unwrap();
        let id = db
            .users()
            .create("uuid-1", "Alice", "alice@example.com", None)
            .await
            .unwrap();

        db.library().record_history(id, "dune", "2").await.unwrap();
        db.library().record_history(id, "dune", "1").await.unwrap();
        db.library().record_history(id, "alien", "1").await.unwrap();

        let history = db.library().history(id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].movie_slug, "dune");
        assert_eq!(history[0].lasted_ep, "2");
        assert_eq!(history[0].watched_eps, vec!["2", "1"]);
        assert_eq!(history[1].movie_slug, "alien");
    }
}
