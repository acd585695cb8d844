//! Resilient RSS/Atom fetching.
//!
//! [`RssFetcher`] fetches feeds over HTTP with bounded concurrency, a shared
//! per-minute request ceiling, per-error-class retry and backoff, User-Agent
//! rotation, and an in-process cache. Feeds can also be imported from OPML
//! and exported as JSON.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use feedpull::{Config, RssFetcher};
//!
//! let fetcher = RssFetcher::from_config(&Config::default())?;
//! let outcome = fetcher.fetch_feed("https://example.com/feed.xml").await;
//! if let Some(feed) = outcome.feed() {
//!     println!("{}", feedpull::feed::format_summary(Some(feed), 5));
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod feed;
pub mod fetch;
pub mod util;

pub use client::RssFetcher;
pub use config::{Config, ConfigError};
pub use feed::{ParsedFeed, ParseError};
pub use fetch::{BatchEntry, BatchResult, FeedRequest, FetchError, FetchOutcome, FetchProgress};
