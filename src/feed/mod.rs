//! Feed retrieval and normalization.
//!
//! - [`parser`] - RSS 2.0 decoding with HTML-entity unescaping
//! - [`fetcher`] - HTTP retrieval bounded by a timeout, behind the [`FeedSource`] trait
//! - [`time`] - publish-date normalization across the layouts feeds use in practice

mod fetcher;
mod parser;
mod time;

pub use fetcher::{FeedSource, FetchError, HttpFetcher, DEFAULT_FETCH_TIMEOUT, USER_AGENT};
pub use parser::{parse_rss, ParseError, RssChannel, RssFeed, RssItem};
pub use time::{parse_unknown_time, TimeParseError};
