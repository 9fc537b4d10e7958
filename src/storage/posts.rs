use chrono::Utc;

use super::schema::Database;
use super::types::{to_millis, DatabaseError, NewPost, Post, PostRow};

/// Upper bound for `browse` so a large limit cannot load the whole table
const MAX_BROWSE_LIMIT: i64 = 500;

impl Database {
    // ========================================================================
    // Post Operations
    // ========================================================================

    /// Insert a single post in its own implicit transaction.
    ///
    /// There is no existence pre-check: the UNIQUE constraint on `url` decides,
    /// and a conflict surfaces as `DatabaseError::Duplicate`. Two processes
    /// racing on the same URL therefore see exactly one winner.
    pub async fn create_post(&self, post: &NewPost) -> Result<Post, DatabaseError> {
        let now = to_millis(Utc::now());
        let row = sqlx::query_as::<_, PostRow>(
            r#"
            INSERT INTO posts (feed_id, title, url, description, published_at,
                               published_at_parsed, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, feed_id, title, url, description, published_at,
                      published_at_parsed, created_at, updated_at
        "#,
        )
        .bind(post.feed_id)
        .bind(&post.title)
        .bind(&post.url)
        .bind(&post.description)
        .bind(post.published_at.map(to_millis))
        .bind(post.published_at_parsed)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_post())
    }

    /// Newest posts from the feeds a user follows
    pub async fn get_posts_for_user(
        &self,
        user_id: i64,
        limit: i64,
    ) -> Result<Vec<Post>, DatabaseError> {
        let limit = limit.clamp(0, MAX_BROWSE_LIMIT);
        let rows = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT p.id, p.feed_id, p.title, p.url, p.description, p.published_at,
                   p.published_at_parsed, p.created_at, p.updated_at
            FROM posts p
            JOIN feed_follows ff ON ff.feed_id = p.feed_id
            WHERE ff.user_id = ?
            ORDER BY p.published_at DESC, p.id DESC
            LIMIT ?
        "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PostRow::into_post).collect())
    }

    /// All posts of one feed in insertion order
    pub async fn get_posts_for_feed(&self, feed_id: i64) -> Result<Vec<Post>, DatabaseError> {
        let rows = sqlx::query_as::<_, PostRow>(
            r#"
            SELECT id, feed_id, title, url, description, published_at,
                   published_at_parsed, created_at, updated_at
            FROM posts
            WHERE feed_id = ?
            ORDER BY id
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PostRow::into_post).collect())
    }

    pub async fn count_posts(&self) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
