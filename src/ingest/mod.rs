//! The ingestion pipeline: one feed per cycle, cycles on a timer.

mod cycle;
mod scheduler;

pub use cycle::{
    ingest_feed, run_cycle, CycleError, CycleOutcome, CycleReport, FeedQueue, PostSink,
};
pub use scheduler::{shutdown_signal, AggStats, Scheduler, MAX_SELECTION_FAILURES};
