//! gator: a multi-user RSS aggregator.
//!
//! Users register feeds and follow them; `agg` keeps fetching the least
//! recently fetched feed on an interval and stores new posts, and `browse`
//! shows the newest posts of the feeds a user follows.

pub mod commands;
pub mod config;
pub mod feed;
pub mod ingest;
pub mod storage;
pub mod util;
