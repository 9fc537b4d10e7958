use anyhow::{Context, Result};

use super::{Command, CommandError, State};
use crate::storage::User;

const DEFAULT_LIMIT: i64 = 2;

/// `browse [limit]`: newest posts from the feeds the user follows.
pub(super) async fn run(state: &mut State, cmd: &Command, user: User) -> Result<()> {
    let limit = match cmd.args.as_slice() {
        [] => DEFAULT_LIMIT,
        [raw] => raw
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or(CommandError::Usage("browse [limit], limit a positive integer"))?,
        _ => return Err(CommandError::Usage("browse [limit]").into()),
    };

    let posts = state
        .db
        .get_posts_for_user(user.id, limit)
        .await
        .context("Failed to load posts")?;

    if posts.is_empty() {
        println!("No posts yet. Follow a feed and run `gator agg`.");
    }
    for post in &posts {
        let date = post
            .published_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "undated".to_string());
        println!("{}  {}", date, post.title);
        println!("    {}", post.url);
        if let Some(description) = post.description.as_deref().filter(|d| !d.is_empty()) {
            println!("    {}", first_line(description, 120));
        }
    }
    Ok(())
}

/// First line of `s`, cut at `max` chars
fn first_line(s: &str, max: usize) -> String {
    let line = s.lines().next().unwrap_or("").trim();
    match line.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &line[..idx]),
        None => line.to_string(),
    }
}
