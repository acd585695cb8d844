//! Fetch orchestration engine.
//!
//! Everything that touches the network on behalf of a feed lives here:
//!
//! - [`rate_limiter`] - Sliding-window admission shared by every request
//! - [`cache`] - Process-lifetime memo of parsed feeds, keyed by URL
//! - [`transport`] - The HTTP boundary (`reqwest` in production)
//! - [`executor`] - Per-URL retry/backoff state machine
//! - [`orchestrator`] - Bounded-concurrency fan-out over many URLs
//!
//! # Architecture
//!
//! ```text
//! FetchOrchestrator ──► FetchExecutor ──► ResponseCache (hit: done)
//!        (W workers)          │
//!                             ├──► RateLimiter::admit   (per attempt)
//!                             ├──► Transport::get
//!                             └──► FeedParser::parse
//! ```
//!
//! The rate limiter and cache are shared by `Arc`; the executor and
//! orchestrator are cheap clones over them.

pub mod cache;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod rate_limiter;
pub mod transport;

pub use cache::ResponseCache;
pub use error::{FetchError, RetryAction};
pub use executor::{
    is_feed_content_type, FeedRequest, FetchExecutor, FetchOutcome, FetchSettings,
    DEFAULT_ACCEPT_LANGUAGE, DEFAULT_MAX_REQUESTS_PER_MINUTE, DEFAULT_MAX_RETRIES,
    DEFAULT_USER_AGENTS,
};
pub use orchestrator::{BatchEntry, BatchResult, FetchOrchestrator, FetchProgress, DEFAULT_WORKERS};
pub use rate_limiter::RateLimiter;
pub use transport::{HttpTransport, RawResponse, Transport, TransportError, DEFAULT_TIMEOUT};
