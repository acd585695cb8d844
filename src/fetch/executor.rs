use std::sync::Arc;

use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CONNECTION, USER_AGENT,
};
use tokio_util::sync::CancellationToken;

use super::cache::ResponseCache;
use super::error::{FetchError, RetryAction};
use super::rate_limiter::RateLimiter;
use super::transport::Transport;
use crate::feed::{FeedParser, ParsedFeed};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_MAX_REQUESTS_PER_MINUTE: u32 = 30;

/// Browser identities rotated across attempts.
pub const DEFAULT_USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
];

pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9,tr;q=0.8";

const ACCEPT_FEEDS: &str =
    "application/rss+xml, application/xml, application/atom+xml, text/xml;q=0.9, */*;q=0.8";
const ACCEPT_COMPRESSION: &str = "gzip, deflate, br";

/// One fetch of one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    pub url: String,
    /// Consult the cache before touching the network
    pub use_cache: bool,
    /// Total attempts allowed, including the first
    pub max_retries: u32,
}

impl FeedRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            use_cache: true,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Result of [`FetchExecutor::fetch`]. Callers tell success from failure
/// only through this tag; the executor never returns `Err`.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The feed was fetched (or served from cache). `feed.malformed` may be set.
    Success(ParsedFeed),
    Failure(FetchError),
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }

    pub fn feed(&self) -> Option<&ParsedFeed> {
        match self {
            FetchOutcome::Success(feed) => Some(feed),
            FetchOutcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            FetchOutcome::Success(_) => None,
            FetchOutcome::Failure(e) => Some(e),
        }
    }
}

/// Per-process knobs for the attempt loop.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub max_requests_per_minute: u32,
    pub user_agents: Arc<[String]>,
    pub accept_language: String,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            max_requests_per_minute: DEFAULT_MAX_REQUESTS_PER_MINUTE,
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
        }
    }
}

/// Single-URL fetch with retry, backoff and User-Agent rotation.
///
/// Holds no state of its own: every field is a shared collaborator, so
/// cloning an executor for each worker is cheap and all clones see the
/// same rate-limit window and cache.
#[derive(Clone)]
pub struct FetchExecutor {
    transport: Arc<dyn Transport>,
    parser: Arc<dyn FeedParser>,
    limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    settings: FetchSettings,
}

impl FetchExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        parser: Arc<dyn FeedParser>,
        limiter: Arc<RateLimiter>,
        cache: Arc<ResponseCache>,
        settings: FetchSettings,
    ) -> Self {
        Self {
            transport,
            parser,
            limiter,
            cache,
            settings,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// User-Agent for a 1-based attempt: the first identity on attempt 1,
    /// advancing one step through the rotation on each later attempt.
    pub fn user_agent_for(&self, attempt: u32) -> &str {
        let agents = &self.settings.user_agents;
        if agents.is_empty() {
            return DEFAULT_USER_AGENTS[0];
        }
        let idx = attempt.saturating_sub(1) as usize % agents.len();
        &agents[idx]
    }

    /// Fetches one feed, walking the retry state machine until success, a
    /// terminal error, cancellation, or the attempt budget runs out.
    ///
    /// A cache hit returns before any rate-limit admission or network I/O.
    /// Successful results are written to the cache before being returned;
    /// failures never are.
    pub async fn fetch(&self, request: &FeedRequest, cancel: &CancellationToken) -> FetchOutcome {
        let url = request.url.as_str();

        if request.use_cache {
            if let Some(feed) = self.cache.get(url) {
                tracing::debug!(url = %url, "Serving feed from cache");
                return FetchOutcome::Success(feed);
            }
        }

        let max_attempts = request.max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            let waited = tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled(url, attempt),
                waited = self.limiter.admit(self.settings.max_requests_per_minute) => waited,
            };

            let user_agent = self.user_agent_for(attempt);
            tracing::info!(
                url = %url,
                attempt = attempt,
                max_attempts = max_attempts,
                waited_ms = waited.as_millis() as u64,
                "Fetching feed"
            );

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled(url, attempt),
                result = self.attempt(url, user_agent) => result,
            };

            let error = match result {
                Ok(feed) => {
                    self.cache.put(url, feed.clone());
                    tracing::info!(
                        url = %url,
                        attempt = attempt,
                        entries = feed.entry_count(),
                        malformed = feed.malformed,
                        "Feed fetched"
                    );
                    return FetchOutcome::Success(feed);
                }
                Err(e) => e,
            };

            match error.retry_action(attempt) {
                RetryAction::Abort => {
                    tracing::warn!(url = %url, attempt = attempt, error = %error, "Fetch failed, not retrying");
                    return FetchOutcome::Failure(error);
                }
                RetryAction::Retry { delay } => {
                    tracing::warn!(
                        url = %url,
                        attempt = attempt,
                        error = %error,
                        delay_secs = delay.as_secs(),
                        "Fetch attempt failed"
                    );

                    // No point sleeping once the budget is spent
                    if attempt < max_attempts && !delay.is_zero() {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return cancelled(url, attempt),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }

            last_error = Some(error);
        }

        match last_error {
            Some(last) => FetchOutcome::Failure(FetchError::RetriesExhausted {
                attempts: max_attempts,
                last: Box::new(last),
            }),
            None => FetchOutcome::Failure(FetchError::Unexpected(
                "attempt loop ended without an attempt".to_string(),
            )),
        }
    }

    /// One GET plus classification. Never sleeps; backoff is the caller's job.
    async fn attempt(&self, url: &str, user_agent: &str) -> Result<ParsedFeed, FetchError> {
        let response = self
            .transport
            .get(url, self.headers(user_agent))
            .await
            .map_err(FetchError::from)?;

        if response.status >= 400 {
            return Err(FetchError::from_status(response.status));
        }

        let content_type = response.content_type.as_deref().unwrap_or("");
        if !is_feed_content_type(content_type) {
            tracing::warn!(url = %url, content_type = %content_type, "Unexpected Content-Type");
        }

        let feed = self
            .parser
            .parse(&response.body)
            .map_err(|e| FetchError::Parse(e.to_string()))?;

        if let Some(warning) = &feed.warning {
            tracing::warn!(url = %url, warning = %warning, "Feed XML is malformed, using parsed result anyway");
        }

        Ok(feed)
    }

    fn headers(&self, user_agent: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_FEEDS));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static(ACCEPT_COMPRESSION));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        match HeaderValue::from_str(&self.settings.accept_language) {
            Ok(value) => {
                headers.insert(ACCEPT_LANGUAGE, value);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring invalid Accept-Language setting");
            }
        }

        let user_agent = HeaderValue::from_str(user_agent).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid User-Agent, using default");
            HeaderValue::from_static(DEFAULT_USER_AGENTS[0])
        });
        headers.insert(USER_AGENT, user_agent);

        headers
    }
}

fn cancelled(url: &str, attempt: u32) -> FetchOutcome {
    tracing::info!(url = %url, attempt = attempt, "Fetch cancelled");
    FetchOutcome::Failure(FetchError::Cancelled)
}

/// True for Content-Type values that plausibly carry a feed.
pub fn is_feed_content_type(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.contains("xml") || ct.contains("rss") || ct.contains("atom")
}
