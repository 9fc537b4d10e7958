use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors.
///
/// `Duplicate` is derived from the driver's constraint kind, so callers can
/// treat a uniqueness conflict as data rather than as a storage failure.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another gator process holds the database lock
    #[error("Another instance of gator appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// A uniqueness constraint rejected the write
    #[error("Duplicate key: {0}")]
    Duplicate(String),

    /// A lookup matched no rows
    #[error("{0} not found")]
    NotFound(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(sqlx::Error),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        Self::from_sqlx(err)
    }
}

impl DatabaseError {
    /// Classify a sqlx error.
    ///
    /// Unique violations are recognised by error kind, never by message text.
    /// Lock detection keeps the message check because SQLite reports
    /// SQLITE_BUSY without a dedicated kind. A file that cannot be opened at
    /// all (SQLITE_CANTOPEN) is a path problem, not a lock, and stays `Other`.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return DatabaseError::Duplicate(db_err.message().to_string());
            }
        }

        let error_string = err.to_string().to_lowercase();
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, DatabaseError::Duplicate(_))
    }
}

// ============================================================================
// Timestamp helpers
// ============================================================================

/// Timestamps are stored as INTEGER Unix milliseconds.
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct UserRow {
    pub id: i64,
    pub name: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl UserRow {
    pub(crate) fn into_user(self) -> User {
        User {
            id: self.id,
            name: self.name,
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedRow {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub user_id: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_fetched_at: Option<i64>,
}

impl FeedRow {
    pub(crate) fn into_feed(self) -> Feed {
        Feed {
            id: self.id,
            name: self.name,
            url: self.url,
            user_id: self.user_id,
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
            last_fetched_at: self.last_fetched_at.map(from_millis),
        }
    }
}

/// Feed joined with the name of the user who added it (`feeds` listing)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedWithCreatorRow {
    pub name: String,
    pub url: String,
    pub creator: String,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedFollowRow {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub feed_name: String,
    pub user_name: String,
}

impl FeedFollowRow {
    pub(crate) fn into_follow(self) -> FeedFollow {
        FeedFollow {
            id: self.id,
            user_id: self.user_id,
            feed_id: self.feed_id,
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
            feed_name: self.feed_name,
            user_name: self.user_name,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PostRow {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: Option<i64>,
    pub published_at_parsed: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PostRow {
    pub(crate) fn into_post(self) -> Post {
        Post {
            id: self.id,
            feed_id: self.feed_id,
            title: self.title,
            url: self.url,
            description: self.description,
            published_at: self.published_at.map(from_millis),
            published_at_parsed: self.published_at_parsed,
            created_at: from_millis(self.created_at),
            updated_at: from_millis(self.updated_at),
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A registered feed.
///
/// `last_fetched_at == None` means the feed has never been fetched; such feeds
/// are always selected before any fetched feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedWithCreator {
    pub name: String,
    pub url: String,
    pub creator: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFollow {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub feed_name: String,
    pub user_name: String,
}

/// A post ready to be inserted.
///
/// `published_at_parsed` is false when `published_at` is the ingestion-time
/// fallback rather than the item's own date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub feed_id: i64,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub published_at_parsed: bool,
}

/// A stored post. `url` is unique across all feeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub url: String,
    pub description: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub published_at_parsed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
