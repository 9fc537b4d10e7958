use anyhow::{Context, Result};

use super::{expect_args, Command, State};
use crate::storage::{DatabaseError, Feed, User};
use crate::util::validate_url;

/// `addfeed <name> <url>`: register a feed and follow it.
pub(super) async fn add(state: &mut State, cmd: &Command, user: User) -> Result<()> {
    let [name, raw_url] = expect_args::<2>(cmd, "addfeed <name> <url>")?;

    let url = validate_url(raw_url).with_context(|| format!("Rejected feed URL '{}'", raw_url))?;
    let name = name.trim();
    anyhow::ensure!(!name.is_empty(), "feed name must not be empty");

    let feed = match state.db.create_feed(name, url.as_str(), user.id).await {
        Ok(feed) => feed,
        Err(DatabaseError::Duplicate(_)) => {
            anyhow::bail!("a feed with URL {} is already registered", url)
        }
        Err(e) => return Err(e).context("Failed to create feed"),
    };

    state
        .db
        .create_feed_follow(user.id, feed.id)
        .await
        .context("Failed to follow new feed")?;

    tracing::info!(feed = %feed.name, url = %feed.url, user = %user.name, "Feed added");
    println!("Added {} ({})", feed.name, feed.url);
    println!("{} is now following {}", user.name, feed.name);
    Ok(())
}

/// `feeds`: every registered feed with its creator.
pub(super) async fn list(state: &mut State, cmd: &Command) -> Result<()> {
    let [] = expect_args::<0>(cmd, "feeds")?;

    let feeds = state.db.get_feeds().await.context("Failed to list feeds")?;
    if feeds.is_empty() {
        println!("No feeds registered");
    }
    for feed in &feeds {
        println!("* {} ({}) added by {}", feed.name, feed.url, feed.creator);
    }
    Ok(())
}

/// `follow <url>`: follow an already registered feed.
pub(super) async fn follow(state: &mut State, cmd: &Command, user: User) -> Result<()> {
    let [url] = expect_args::<1>(cmd, "follow <url>")?;
    let feed = feed_by_url(state, url).await?;

    let follow = match state.db.create_feed_follow(user.id, feed.id).await {
        Ok(follow) => follow,
        Err(DatabaseError::Duplicate(_)) => {
            anyhow::bail!("{} already follows {}", user.name, feed.name)
        }
        Err(e) => return Err(e).context("Failed to follow feed"),
    };

    println!("{} is now following {}", follow.user_name, follow.feed_name);
    Ok(())
}

/// `following`: names of the feeds the current user follows.
pub(super) async fn following(state: &mut State, cmd: &Command, user: User) -> Result<()> {
    let [] = expect_args::<0>(cmd, "following")?;

    let follows = state
        .db
        .get_feed_follows_for_user(user.id)
        .await
        .context("Failed to list follows")?;

    if follows.is_empty() {
        println!("{} is not following any feeds", user.name);
    }
    for follow in &follows {
        println!("* {}", follow.feed_name);
    }
    Ok(())
}

/// `unfollow <url>`
pub(super) async fn unfollow(state: &mut State, cmd: &Command, user: User) -> Result<()> {
    let [url] = expect_args::<1>(cmd, "unfollow <url>")?;
    let feed = feed_by_url(state, url).await?;

    match state.db.delete_feed_follow(user.id, feed.id).await {
        Ok(()) => {}
        Err(DatabaseError::NotFound(_)) => {
            anyhow::bail!("{} does not follow {}", user.name, feed.name)
        }
        Err(e) => return Err(e).context("Failed to unfollow feed"),
    }

    println!("{} unfollowed {}", user.name, feed.name);
    Ok(())
}

/// Look up a feed by URL, normalized the same way `addfeed` stored it.
async fn feed_by_url(state: &State, url: &str) -> Result<Feed> {
    let normalized = url::Url::parse(url.trim())
        .map(String::from)
        .unwrap_or_else(|_| url.trim().to_string());

    match state.db.get_feed_by_url(&normalized).await {
        Ok(feed) => Ok(feed),
        Err(DatabaseError::NotFound(_)) => anyhow::bail!("no feed registered with URL {}", url),
        Err(e) => Err(e).context("Failed to look up feed"),
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::test_support::*;
    use crate::commands::State;

    const BLOG: &str = "https://blog.example.com/index.xml";

    async fn logged_in_state(dir: &str) -> State {
        let mut state = state(dir).await;
        run(&mut state, "register", &["kahya"]).await.unwrap();
        state
    }

    #[tokio::test]
    async fn test_addfeed_creates_and_follows() {
        let mut state = logged_in_state("addfeed").await;
        run(&mut state, "addfeed", &["Blog", BLOG]).await.unwrap();

        let user = state.db.get_user("kahya").await.unwrap();
        let feed = state.db.get_feed_by_url(BLOG).await.unwrap();
        assert_eq!(feed.name, "Blog");
        assert_eq!(feed.user_id, user.id);
        assert!(feed.last_fetched_at.is_none());

        let follows = state.db.get_feed_follows_for_user(user.id).await.unwrap();
        assert_eq!(follows.len(), 1);
        assert_eq!(follows[0].feed_id, feed.id);
    }

    #[tokio::test]
    async fn test_addfeed_rejects_bad_urls() {
        let mut state = logged_in_state("addfeed_bad").await;
        for url in ["not a url", "ftp://example.com/rss", "http://localhost:8080/rss"] {
            assert!(run(&mut state, "addfeed", &["Bad", url]).await.is_err(), "accepted {}", url);
        }
        assert!(state.db.get_feeds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_addfeed_duplicate_url_fails() {
        let mut state = logged_in_state("addfeed_dup").await;
        run(&mut state, "addfeed", &["Blog", BLOG]).await.unwrap();
        let err = run(&mut state, "addfeed", &["Again", BLOG]).await.unwrap_err();
        assert!(err.to_string().contains("already registered"), "{}", err);
    }

    #[tokio::test]
    async fn test_follow_and_unfollow() {
        let mut state = logged_in_state("follow").await;
        run(&mut state, "addfeed", &["Blog", BLOG]).await.unwrap();
        run(&mut state, "register", &["lane"]).await.unwrap();

        run(&mut state, "follow", &[BLOG]).await.unwrap();
        let err = run(&mut state, "follow", &[BLOG]).await.unwrap_err();
        assert_eq!(err.to_string(), "lane already follows Blog");

        let lane = state.db.get_user("lane").await.unwrap();
        assert_eq!(state.db.get_feed_follows_for_user(lane.id).await.unwrap().len(), 1);

        run(&mut state, "unfollow", &[BLOG]).await.unwrap();
        assert!(state.db.get_feed_follows_for_user(lane.id).await.unwrap().is_empty());

        let err = run(&mut state, "unfollow", &[BLOG]).await.unwrap_err();
        assert_eq!(err.to_string(), "lane does not follow Blog");
    }

    #[tokio::test]
    async fn test_follow_unknown_feed_fails() {
        let mut state = logged_in_state("follow_unknown").await;
        let err = run(&mut state, "follow", &[BLOG]).await.unwrap_err();
        assert!(err.to_string().starts_with("no feed registered"), "{}", err);
    }

    #[tokio::test]
    async fn test_listing_commands_succeed() {
        let mut state = logged_in_state("listing").await;
        run(&mut state, "feeds", &[]).await.unwrap();
        run(&mut state, "following", &[]).await.unwrap();
        run(&mut state, "addfeed", &["Blog", BLOG]).await.unwrap();
        run(&mut state, "feeds", &[]).await.unwrap();
        run(&mut state, "following", &[]).await.unwrap();
    }
}
