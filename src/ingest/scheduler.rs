use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::MissedTickBehavior;

use super::cycle::{ingest_feed, CycleError, CycleOutcome, FeedQueue, PostSink};
use crate::feed::FeedSource;

/// Running totals for one `agg` session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AggStats {
    pub ticks: u64,
    pub cycles: u64,
    pub new_posts: u64,
    pub fetch_failures: u64,
    pub storage_failures: u64,
    pub selection_failures: u64,
}

/// Consecutive ticks whose feed selection failed before `run` gives up
pub const MAX_SELECTION_FAILURES: u32 = 5;

/// Drives ingestion cycles on a fixed interval until shut down.
pub struct Scheduler<Q, S, P> {
    queue: Q,
    source: S,
    sink: P,
    interval: Duration,
    feeds_per_tick: usize,
}

impl<Q, S, P> Scheduler<Q, S, P>
where
    Q: FeedQueue + Sync,
    S: FeedSource + Sync,
    P: PostSink + Sync,
{
    pub fn new(queue: Q, source: S, sink: P, interval: Duration) -> Self {
        Self {
            queue,
            source,
            sink,
            interval,
            feeds_per_tick: 1,
        }
    }

    /// Process up to `n` feeds per tick (at least one)
    pub fn with_feeds_per_tick(mut self, n: usize) -> Self {
        self.feeds_per_tick = n.max(1);
        self
    }

    /// Run until `shutdown` resolves.
    ///
    /// The first tick fires immediately. Ticks that overrun the interval delay
    /// the next one instead of bursting to catch up, so cycles never overlap.
    /// Shutdown is observed while waiting and between cycles; a cycle that has
    /// started always runs to completion, bounded by the fetch timeout.
    ///
    /// # Errors
    ///
    /// A failed selection query is logged and retried on the next tick. Only
    /// after [`MAX_SELECTION_FAILURES`] ticks in a row fail that way is storage
    /// taken to be gone, and the last error is returned. Fetch and storage
    /// failures inside a cycle are logged and the next cycle proceeds.
    pub async fn run<F>(&self, shutdown: F) -> Result<AggStats, CycleError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = AggStats::default();
        let mut failed_selections = 0;

        tracing::info!(
            interval = ?self.interval,
            feeds_per_tick = self.feeds_per_tick,
            "Collecting feeds"
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = interval.tick() => {}
            }

            match self.drain(&mut stats, shutdown.as_mut()).await {
                Drain::Done => failed_selections = 0,
                Drain::Interrupted => break,
                Drain::SelectionFailed(e) => {
                    failed_selections += 1;
                    if failed_selections >= MAX_SELECTION_FAILURES {
                        tracing::error!(
                            attempts = failed_selections,
                            error = %e,
                            "Feed selection keeps failing, giving up"
                        );
                        return Err(e);
                    }
                }
            }
        }

        tracing::info!(
            ticks = stats.ticks,
            cycles = stats.cycles,
            new_posts = stats.new_posts,
            "Aggregation stopped"
        );
        Ok(stats)
    }

    /// One tick without a shutdown signal. A failed selection is returned.
    pub async fn tick(&self, stats: &mut AggStats) -> Result<(), CycleError> {
        match self
            .drain(stats, std::pin::pin!(std::future::pending::<()>()))
            .await
        {
            Drain::SelectionFailed(e) => Err(e),
            Drain::Done | Drain::Interrupted => Ok(()),
        }
    }

    /// Ingest up to `feeds_per_tick` feeds, least recently fetched first.
    ///
    /// Stops early once the queue wraps around to a feed already handled in
    /// this tick, when `shutdown` has resolved before the next cycle, or when
    /// selection fails.
    async fn drain<F>(&self, stats: &mut AggStats, mut shutdown: Pin<&mut F>) -> Drain
    where
        F: Future<Output = ()>,
    {
        stats.ticks += 1;
        let mut seen = HashSet::new();

        for _ in 0..self.feeds_per_tick {
            if shutdown.as_mut().now_or_never().is_some() {
                return Drain::Interrupted;
            }

            let feed = match self.queue.next_feed().await {
                Ok(feed) => feed,
                Err(e) => {
                    stats.selection_failures += 1;
                    let e = CycleError::Selection(e);
                    tracing::error!(error = %e, "Selection failed, retrying next tick");
                    return Drain::SelectionFailed(e);
                }
            };
            let Some(feed) = feed else {
                if seen.is_empty() {
                    tracing::info!("{}", CycleError::NoFeeds);
                }
                break;
            };
            if !seen.insert(feed.id) {
                break;
            }

            stats.cycles += 1;
            match ingest_feed(&feed, &self.queue, &self.source, &self.sink).await {
                Ok(report) => {
                    stats.new_posts += report.new_posts() as u64;
                    if matches!(report.outcome, CycleOutcome::FetchFailed(_)) {
                        stats.fetch_failures += 1;
                    }
                }
                Err(e) => {
                    stats.storage_failures += 1;
                    tracing::error!(error = %e, "Cycle failed");
                }
            }
        }

        Drain::Done
    }
}

#[derive(Debug)]
enum Drain {
    Done,
    Interrupted,
    SelectionFailed(CycleError),
}

/// Resolves on SIGINT or SIGTERM (Ctrl-C only off Unix).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            _ => {
                tracing::warn!("Could not install signal handlers, falling back to Ctrl-C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down gracefully"),
            _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down gracefully"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received Ctrl-C, shutting down gracefully");
    }
}
