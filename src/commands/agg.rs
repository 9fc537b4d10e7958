use anyhow::{Context, Result};

use super::{Command, CommandError, State};
use crate::config::parse_interval;
use crate::feed::HttpFetcher;
use crate::ingest::{shutdown_signal, Scheduler};

/// `agg [interval]`: collect feeds until SIGINT/SIGTERM.
///
/// Without an argument the `[agg] interval` from the config is used.
pub(super) async fn run(state: &mut State, cmd: &Command) -> Result<()> {
    let interval = match cmd.args.as_slice() {
        [] => state.config.agg.interval().context("Invalid [agg] interval in config")?,
        [raw] => parse_interval(raw)?,
        _ => return Err(CommandError::Usage("agg [interval]").into()),
    };

    let fetcher = HttpFetcher::new(state.http.clone(), state.config.agg.fetch_timeout());
    let scheduler = Scheduler::new(state.db.clone(), fetcher, state.db.clone(), interval)
        .with_feeds_per_tick(state.config.agg.feeds_per_tick);

    println!("Collecting feeds every {}", humanize(interval));
    let stats = scheduler
        .run(shutdown_signal())
        .await
        .context("Aggregation aborted")?;

    println!(
        "Stopped after {} cycles: {} new posts, {} fetch failures, {} storage failures",
        stats.cycles, stats.new_posts, stats.fetch_failures, stats.storage_failures
    );
    Ok(())
}

/// `1h30m`, `5m`, `45s`, `250ms`
fn humanize(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        return format!("{}ms", d.as_millis());
    }

    let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{}h", h));
    }
    if m > 0 {
        out.push_str(&format!("{}m", m));
    }
    if s > 0 {
        out.push_str(&format!("{}s", s));
    }
    out
}
