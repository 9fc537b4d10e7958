use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{to_millis, DatabaseError, Feed, FeedRow, FeedWithCreator, FeedWithCreatorRow};

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Register a feed owned by `user_id`. A known URL yields `DatabaseError::Duplicate`.
    pub async fn create_feed(
        &self,
        name: &str,
        url: &str,
        user_id: i64,
    ) -> Result<Feed, DatabaseError> {
        let now = to_millis(Utc::now());
        let row = sqlx::query_as::<_, FeedRow>(
            r#"
            INSERT INTO feeds (name, url, user_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING id, name, url, user_id, created_at, updated_at, last_fetched_at
        "#,
        )
        .bind(name)
        .bind(url)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_feed())
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Feed, DatabaseError> {
        sqlx::query_as::<_, FeedRow>(
            r#"
            SELECT id, name, url, user_id, created_at, updated_at, last_fetched_at
            FROM feeds
            WHERE url = ?
        "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?
        .map(FeedRow::into_feed)
        .ok_or_else(|| DatabaseError::NotFound(format!("Feed '{}'", url)))
    }

    pub async fn get_feed(&self, feed_id: i64) -> Result<Feed, DatabaseError> {
        sqlx::query_as::<_, FeedRow>(
            r#"
            SELECT id, name, url, user_id, created_at, updated_at, last_fetched_at
            FROM feeds
            WHERE id = ?
        "#,
        )
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?
        .map(FeedRow::into_feed)
        .ok_or_else(|| DatabaseError::NotFound(format!("Feed #{}", feed_id)))
    }

    /// All feeds with the name of the user who added them
    pub async fn get_feeds(&self) -> Result<Vec<FeedWithCreator>, DatabaseError> {
        let rows = sqlx::query_as::<_, FeedWithCreatorRow>(
            r#"
            SELECT f.name, f.url, u.name AS creator
            FROM feeds f
            JOIN users u ON u.id = f.user_id
            ORDER BY f.created_at, f.id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| FeedWithCreator {
                name: r.name,
                url: r.url,
                creator: r.creator,
            })
            .collect())
    }

    // ========================================================================
    // Fetch Scheduling
    // ========================================================================

    /// The feed that has waited longest for a fetch.
    ///
    /// Never-fetched feeds come first, then ascending `last_fetched_at`. Ties
    /// fall back to insertion order so a full round visits every feed once.
    /// Returns `None` when no feeds are registered.
    pub async fn get_next_feed_to_fetch(&self) -> Result<Option<Feed>, DatabaseError> {
        let row = sqlx::query_as::<_, FeedRow>(
            r#"
            SELECT id, name, url, user_id, created_at, updated_at, last_fetched_at
            FROM feeds
            ORDER BY last_fetched_at ASC NULLS FIRST, id ASC
            LIMIT 1
        "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FeedRow::into_feed))
    }

    /// Stamp a feed as fetched now. Idempotent.
    pub async fn mark_feed_fetched(&self, feed_id: i64) -> Result<(), DatabaseError> {
        self.mark_feed_fetched_at(feed_id, Utc::now()).await
    }

    /// Stamp a feed as fetched at an explicit instant
    pub async fn mark_feed_fetched_at(
        &self,
        feed_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let at = to_millis(at);
        sqlx::query("UPDATE feeds SET last_fetched_at = ?, updated_at = ? WHERE id = ?")
            .bind(at)
            .bind(at)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
