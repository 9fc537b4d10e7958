use chrono::{DateTime, Utc};
use std::future::Future;
use thiserror::Error;

use crate::feed::{parse_unknown_time, FeedSource, FetchError, RssItem};
use crate::storage::{Database, DatabaseError, Feed, NewPost, Post};

/// Selects feeds for fetching and records that they were fetched.
pub trait FeedQueue {
    /// Least-recently-fetched feed, never-fetched first; `None` when empty
    fn next_feed(&self) -> impl Future<Output = Result<Option<Feed>, DatabaseError>> + Send;

    /// Set the feed's last fetch time to now. Idempotent.
    fn mark_fetched(&self, feed_id: i64) -> impl Future<Output = Result<(), DatabaseError>> + Send;
}

/// Persists posts; a URL already stored must come back as `DatabaseError::Duplicate`.
pub trait PostSink {
    fn insert_post(&self, post: &NewPost) -> impl Future<Output = Result<Post, DatabaseError>> + Send;
}

impl FeedQueue for Database {
    async fn next_feed(&self) -> Result<Option<Feed>, DatabaseError> {
        self.get_next_feed_to_fetch().await
    }

    async fn mark_fetched(&self, feed_id: i64) -> Result<(), DatabaseError> {
        self.mark_feed_fetched(feed_id).await
    }
}

impl PostSink for Database {
    async fn insert_post(&self, post: &NewPost) -> Result<Post, DatabaseError> {
        self.create_post(post).await
    }
}

/// A cycle that could not complete normally.
#[derive(Debug, Error)]
pub enum CycleError {
    /// No feeds are registered. Recoverable: try again next tick.
    #[error("no feeds to fetch")]
    NoFeeds,

    /// The selection query itself failed. The scheduler retries next tick.
    #[error("failed to select next feed: {0}")]
    Selection(#[source] DatabaseError),

    /// A non-duplicate insert failure aborted the feed's items
    #[error("storing posts for feed '{feed}' failed: {source}")]
    Storage {
        feed: String,
        #[source]
        source: DatabaseError,
    },

    #[error("marking feed '{feed}' as fetched failed: {source}")]
    MarkFetched {
        feed: String,
        #[source]
        source: DatabaseError,
        /// Insert failure that had already stopped the feed's items, if any
        abandoned: Option<DatabaseError>,
    },
}

/// What happened to the selected feed.
#[derive(Debug)]
pub enum CycleOutcome {
    Ingested {
        new_posts: usize,
        /// Items whose URL was already stored
        duplicates: usize,
        /// Items stored with the ingestion time because their date did not parse
        fallback_dates: usize,
    },
    /// Nothing was stored; the feed was still marked fetched
    FetchFailed(FetchError),
}

#[derive(Debug)]
pub struct CycleReport {
    pub feed_id: i64,
    pub feed_name: String,
    pub outcome: CycleOutcome,
}

impl CycleReport {
    pub fn new_posts(&self) -> usize {
        match self.outcome {
            CycleOutcome::Ingested { new_posts, .. } => new_posts,
            CycleOutcome::FetchFailed(_) => 0,
        }
    }
}

/// One ingestion cycle: select a feed, then [`ingest_feed`] it.
pub async fn run_cycle<Q, S, P>(queue: &Q, source: &S, sink: &P) -> Result<CycleReport, CycleError>
where
    Q: FeedQueue + Sync,
    S: FeedSource + Sync,
    P: PostSink + Sync,
{
    let feed = queue
        .next_feed()
        .await
        .map_err(CycleError::Selection)?
        .ok_or(CycleError::NoFeeds)?;

    ingest_feed(&feed, queue, source, sink).await
}

/// Fetch one feed and store its new items.
///
/// - A fetch failure stores nothing and is reported in the outcome.
/// - Items are stored one at a time in document order. Duplicates are
///   counted and skipped; an unparseable date falls back to the ingestion
///   time. Any other storage error stops the remaining items.
/// - The feed is marked fetched in every case, including after a fetch
///   failure or a storage abort, so a broken feed cannot stay at the head of
///   the queue.
pub async fn ingest_feed<Q, S, P>(
    feed: &Feed,
    queue: &Q,
    source: &S,
    sink: &P,
) -> Result<CycleReport, CycleError>
where
    Q: FeedQueue + Sync,
    S: FeedSource + Sync,
    P: PostSink + Sync,
{
    tracing::debug!(feed = %feed.name, url = %feed.url, "Fetching feed");

    let document = match source.fetch(&feed.url).await {
        Ok(document) => document,
        Err(e) => {
            tracing::warn!(
                feed = %feed.name,
                url = %feed.url,
                error = %e,
                parse_error = e.is_parse(),
                "Fetch failed, feed skipped this cycle"
            );
            mark_fetched(queue, feed, None).await?;
            return Ok(CycleReport {
                feed_id: feed.id,
                feed_name: feed.name.clone(),
                outcome: CycleOutcome::FetchFailed(e),
            });
        }
    };

    let ingested_at = Utc::now();
    let mut new_posts = 0;
    let mut duplicates = 0;
    let mut fallback_dates = 0;
    let mut aborted = None;

    for item in &document.channel.items {
        let post = to_new_post(feed.id, item, ingested_at);
        if !post.published_at_parsed {
            fallback_dates += 1;
            tracing::debug!(
                feed = %feed.name,
                pub_date = %item.pub_date,
                "Could not parse publish time, using ingestion time"
            );
        }

        match sink.insert_post(&post).await {
            Ok(_) => new_posts += 1,
            Err(e) if e.is_duplicate() => duplicates += 1,
            Err(e) => {
                aborted = Some(e);
                break;
            }
        }
    }

    if let Some(source) = &aborted {
        tracing::error!(
            feed = %feed.name,
            stored = new_posts,
            error = %source,
            "Storage failure, remaining items abandoned"
        );
    }

    let aborted = mark_fetched(queue, feed, aborted).await?;
    if let Some(source) = aborted {
        return Err(CycleError::Storage {
            feed: feed.name.clone(),
            source,
        });
    }

    tracing::info!(
        feed = %feed.name,
        items = document.channel.items.len(),
        new_posts,
        duplicates,
        fallback_dates,
        "Feed ingested"
    );

    Ok(CycleReport {
        feed_id: feed.id,
        feed_name: feed.name.clone(),
        outcome: CycleOutcome::Ingested {
            new_posts,
            duplicates,
            fallback_dates,
        },
    })
}

/// Mark `feed` fetched, handing `abandoned` back on success so the caller
/// can still report it.
async fn mark_fetched<Q: FeedQueue + Sync>(
    queue: &Q,
    feed: &Feed,
    abandoned: Option<DatabaseError>,
) -> Result<Option<DatabaseError>, CycleError> {
    match queue.mark_fetched(feed.id).await {
        Ok(()) => Ok(abandoned),
        Err(source) => Err(CycleError::MarkFetched {
            feed: feed.name.clone(),
            source,
            abandoned,
        }),
    }
}

/// Build the post for one item. A date that does not parse becomes `fallback`.
fn to_new_post(feed_id: i64, item: &RssItem, fallback: DateTime<Utc>) -> NewPost {
    let (published_at, published_at_parsed) = match parse_unknown_time(&item.pub_date) {
        Ok(at) => (at, true),
        Err(_) => (fallback, false),
    };

    NewPost {
        feed_id,
        title: item.title.clone(),
        url: item.link.clone(),
        description: (!item.description.is_empty()).then(|| item.description.clone()),
        published_at: Some(published_at),
        published_at_parsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{ParseError, RssChannel, RssFeed};
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn feed(id: i64, name: &str) -> Feed {
        let now = Utc::now();
        Feed {
            id,
            name: name.to_string(),
            url: format!("https://{}.example.com/rss", name),
            user_id: 1,
            created_at: now,
            updated_at: now,
            last_fetched_at: None,
        }
    }

    fn item(link: &str, pub_date: &str) -> RssItem {
        RssItem {
            title: format!("Title {}", link),
            link: link.to_string(),
            description: String::new(),
            pub_date: pub_date.to_string(),
        }
    }

    /// In-memory queue + sink with URL uniqueness and an optional poisoned URL.
    #[derive(Default)]
    struct Fake {
        feeds: Vec<Feed>,
        marked: Mutex<Vec<i64>>,
        stored: Mutex<Vec<NewPost>>,
        fail_on: Option<String>,
        fail_mark: bool,
    }

    impl FeedQueue for Fake {
        async fn next_feed(&self) -> Result<Option<Feed>, DatabaseError> {
            Ok(self.feeds.first().cloned())
        }

        async fn mark_fetched(&self, feed_id: i64) -> Result<(), DatabaseError> {
            if self.fail_mark {
                return Err(DatabaseError::Other(sqlx::Error::PoolTimedOut));
            }
            self.marked.lock().unwrap().push(feed_id);
            Ok(())
        }
    }

    impl PostSink for Fake {
        async fn insert_post(&self, post: &NewPost) -> Result<Post, DatabaseError> {
            if self.fail_on.as_deref() == Some(post.url.as_str()) {
                return Err(DatabaseError::Other(sqlx::Error::PoolClosed));
            }
            let mut stored = self.stored.lock().unwrap();
            let urls: HashSet<&str> = stored.iter().map(|p| p.url.as_str()).collect();
            if urls.contains(post.url.as_str()) {
                return Err(DatabaseError::Duplicate(post.url.clone()));
            }
            stored.push(post.clone());
            let now = Utc::now();
            Ok(Post {
                id: stored.len() as i64,
                feed_id: post.feed_id,
                title: post.title.clone(),
                url: post.url.clone(),
                description: post.description.clone(),
                published_at: post.published_at,
                published_at_parsed: post.published_at_parsed,
                created_at: now,
                updated_at: now,
            })
        }
    }

    struct Canned(Result<Vec<RssItem>, ()>);

    impl FeedSource for Canned {
        async fn fetch(&self, _url: &str) -> Result<RssFeed, FetchError> {
            match &self.0 {
                Ok(items) => Ok(RssFeed {
                    channel: RssChannel {
                        items: items.clone(),
                        ..RssChannel::default()
                    },
                }),
                Err(()) => Err(FetchError::Parse(ParseError::MissingChannel)),
            }
        }
    }

    #[tokio::test]
    async fn test_no_feeds_is_recoverable() {
        let fake = Fake::default();
        let err = run_cycle(&fake, &Canned(Ok(vec![])), &fake).await.unwrap_err();
        assert!(matches!(err, CycleError::NoFeeds));
    }

    #[tokio::test]
    async fn test_fetch_failure_marks_feed_and_stores_nothing() {
        let fake = Fake {
            feeds: vec![feed(7, "broken")],
            ..Fake::default()
        };
        let report = run_cycle(&fake, &Canned(Err(())), &fake).await.unwrap();

        assert!(matches!(report.outcome, CycleOutcome::FetchFailed(ref e) if e.is_parse()));
        assert_eq!(report.new_posts(), 0);
        assert_eq!(*fake.marked.lock().unwrap(), vec![7]);
        assert!(fake.stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicates_skipped_and_counted() {
        let fake = Fake {
            feeds: vec![feed(1, "a")],
            ..Fake::default()
        };
        let items = vec![
            item("https://a.example.com/1", "2024-01-15"),
            item("https://a.example.com/1", "2024-01-15"),
            item("https://a.example.com/2", "2024-01-16"),
        ];
        let report = run_cycle(&fake, &Canned(Ok(items)), &fake).await.unwrap();

        match report.outcome {
            CycleOutcome::Ingested {
                new_posts,
                duplicates,
                ..
            } => {
                assert_eq!(new_posts, 2);
                assert_eq!(duplicates, 1);
            }
            other => panic!("expected Ingested, got {:?}", other),
        }
        assert_eq!(fake.stored.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_date_uses_ingestion_time() {
        let fake = Fake {
            feeds: vec![feed(1, "a")],
            ..Fake::default()
        };
        let before = Utc::now();
        let items = vec![item("https://a.example.com/1", "sometime last week")];
        let report = run_cycle(&fake, &Canned(Ok(items)), &fake).await.unwrap();
        let after = Utc::now();

        assert!(matches!(
            report.outcome,
            CycleOutcome::Ingested {
                new_posts: 1,
                fallback_dates: 1,
                ..
            }
        ));
        let stored = fake.stored.lock().unwrap();
        let published = stored[0].published_at.unwrap();
        assert!(published >= before && published <= after);
        assert!(!stored[0].published_at_parsed);
    }

    #[tokio::test]
    async fn test_parsed_date_is_kept() {
        let fake = Fake {
            feeds: vec![feed(1, "a")],
            ..Fake::default()
        };
        let items = vec![item("https://a.example.com/1", "2024-01-15T10:00:00Z")];
        run_cycle(&fake, &Canned(Ok(items)), &fake).await.unwrap();

        let stored = fake.stored.lock().unwrap();
        assert_eq!(
            stored[0].published_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap())
        );
        assert!(stored[0].published_at_parsed);
        assert_eq!(stored[0].description, None);
    }

    #[tokio::test]
    async fn test_storage_error_aborts_but_still_marks_fetched() {
        let fake = Fake {
            feeds: vec![feed(3, "flaky")],
            fail_on: Some("https://flaky.example.com/2".to_string()),
            ..Fake::default()
        };
        let items = vec![
            item("https://flaky.example.com/1", ""),
            item("https://flaky.example.com/2", ""),
            item("https://flaky.example.com/3", ""),
        ];
        let err = run_cycle(&fake, &Canned(Ok(items)), &fake).await.unwrap_err();

        assert!(matches!(err, CycleError::Storage { ref feed, .. } if feed == "flaky"));
        assert_eq!(fake.stored.lock().unwrap().len(), 1, "items after the failure are not attempted");
        assert_eq!(*fake.marked.lock().unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn test_mark_failure_keeps_abandoned_storage_error() {
        let fake = Fake {
            feeds: vec![feed(4, "flaky")],
            fail_on: Some("https://flaky.example.com/1".to_string()),
            fail_mark: true,
            ..Fake::default()
        };
        let items = vec![item("https://flaky.example.com/1", "")];
        let err = run_cycle(&fake, &Canned(Ok(items)), &fake).await.unwrap_err();

        match err {
            CycleError::MarkFetched {
                feed,
                source,
                abandoned,
            } => {
                assert_eq!(feed, "flaky");
                assert!(matches!(source, DatabaseError::Other(sqlx::Error::PoolTimedOut)));
                assert!(matches!(abandoned, Some(DatabaseError::Other(sqlx::Error::PoolClosed))));
            }
            other => panic!("expected MarkFetched, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mark_failure_after_clean_ingest_has_nothing_abandoned() {
        let fake = Fake {
            feeds: vec![feed(5, "a")],
            fail_mark: true,
            ..Fake::default()
        };
        let items = vec![item("https://a.example.com/1", "")];
        let err = run_cycle(&fake, &Canned(Ok(items)), &fake).await.unwrap_err();

        assert!(matches!(err, CycleError::MarkFetched { abandoned: None, .. }));
        assert_eq!(fake.stored.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_document_still_marks_fetched() {
        let fake = Fake {
            feeds: vec![feed(9, "quiet")],
            ..Fake::default()
        };
        let report = run_cycle(&fake, &Canned(Ok(vec![])), &fake).await.unwrap();
        assert_eq!(report.new_posts(), 0);
        assert_eq!(*fake.marked.lock().unwrap(), vec![9]);
    }
}
