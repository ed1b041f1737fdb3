//! Scheduled cleanup of expired refresh tokens and idle rate limiter entries.

use crate::db::Database;
use crate::rate_limit::RateLimitConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Run all cleanup tasks once.
pub async fn run_cleanup(db: &Database, rate_limit: &RateLimitConfig) {
    match db.tokens().delete_expired().await {
        Ok(count) if count > 0 => info!("Cleaned up {} expired refresh tokens", count),
        Ok(_) => {}
        Err(e) => error!("Failed to clean up expired refresh tokens: {}", e),
    }

    let tracked = rate_limit.prune();
    debug!(tracked, "Pruned rate limiter state");
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(
    db: Database,
    rate_limit: Arc<RateLimitConfig>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_cleanup(&db, &rate_limit).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_cleanup_keeps_live_tokens() {
        let db = Database::open(":memory:").await.unwrap();
        let id = db
            .users()
            .create("uuid-1", "Alice", "alice@example.com", None)
            .await
            .unwrap();
        db.tokens().add(id, "expired", 1).await.unwrap();
        db.tokens().add(id, "live", i64::MAX).await.unwrap();

        run_cleanup(&db, &RateLimitConfig::new(10, false)).await;

        assert_eq!(db.tokens().list_by_user(id).await.unwrap(), vec!["live"]);
    }
}
