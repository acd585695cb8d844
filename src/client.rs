//! `RssFetcher`: the entry point that wires the fetch engine together.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::feed::{self, FeedParser, FeedRsParser, OpmlCategories, ParsedFeed};
use crate::fetch::{
    BatchResult, FeedRequest, FetchExecutor, FetchOrchestrator, FetchOutcome, FetchProgress,
    HttpTransport, RateLimiter, ResponseCache, Transport,
};

/// Owns the process-wide rate limiter and cache and hands them to every
/// fetch it runs.
///
/// All fetches share one [`CancellationToken`]; cancelling it (see
/// [`RssFetcher::shutdown`]) winds down single and batch fetches alike.
#[derive(Clone)]
pub struct RssFetcher {
    orchestrator: FetchOrchestrator,
    max_retries: u32,
    cancel: CancellationToken,
}

impl RssFetcher {
    /// Builds a fetcher with the production `reqwest` transport.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = HttpTransport::with_timeout(config.request_timeout())
            .context("Failed to build HTTP client")?;
        Ok(Self::with_transport(
            config,
            Arc::new(transport),
            Arc::new(FeedRsParser),
        ))
    }

    /// Builds a fetcher over any transport and parser.
    pub fn with_transport(
        config: &Config,
        transport: Arc<dyn Transport>,
        parser: Arc<dyn FeedParser>,
    ) -> Self {
        let config = config.clone().normalized();
        let executor = FetchExecutor::new(
            transport,
            parser,
            Arc::new(RateLimiter::new()),
            Arc::new(ResponseCache::new(config.cache_enabled)),
            config.fetch_settings(),
        );
        let orchestrator =
            FetchOrchestrator::new(executor, config.max_workers).with_max_retries(config.max_retries);

        tracing::debug!(
            workers = config.max_workers,
            retries = config.max_retries,
            cache = config.cache_enabled,
            "Fetcher ready"
        );

        Self {
            orchestrator,
            max_retries: config.max_retries,
            cancel: CancellationToken::new(),
        }
    }

    /// Fetches one feed with the configured attempt budget, using the cache.
    pub async fn fetch_feed(&self, url: &str) -> FetchOutcome {
        self.fetch(&self.request(url)).await
    }

    pub async fn fetch(&self, request: &FeedRequest) -> FetchOutcome {
        self.orchestrator
            .executor()
            .fetch(request, &self.cancel)
            .await
    }

    /// A [`FeedRequest`] for `url` carrying the configured defaults.
    pub fn request(&self, url: &str) -> FeedRequest {
        FeedRequest::new(url).max_retries(self.max_retries)
    }

    /// Fetches many feeds concurrently; see [`FetchOrchestrator::fetch_all_with_progress`].
    pub async fn fetch_multiple<I, S>(
        &self,
        urls: I,
        progress_tx: Option<mpsc::Sender<FetchProgress>>,
    ) -> BatchResult
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.orchestrator
            .fetch_all_with_progress(urls, &self.cancel, progress_tx)
            .await
    }

    /// Reads an OPML subscription list; unreadable files yield no categories.
    pub async fn parse_opml(&self, path: &Path) -> OpmlCategories {
        feed::parse_opml(path).await
    }

    pub fn export_to_json(&self, feed: &ParsedFeed, path: &Path) -> Result<()> {
        feed::export_to_json(feed, path)
    }

    /// Token observed by every fetch; clone it to cancel from elsewhere.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn cache(&self) -> &ResponseCache {
        self.orchestrator.executor().cache()
    }

    pub fn limiter(&self) -> &RateLimiter {
        self.orchestrator.executor().limiter()
    }

    pub fn workers(&self) -> usize {
        self.orchestrator.workers()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::executor::tests::{ScriptedTransport, Step, VALID_RSS};
    use crate::fetch::FetchError;

    fn scripted(config: Config, steps: Vec<Step>) -> (RssFetcher, Arc<ScriptedTransport>) {
        let transport = ScriptedTransport::new(steps);
        let fetcher = RssFetcher::with_transport(&config, transport.clone(), Arc::new(FeedRsParser));
        (fetcher, transport)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_feed_uses_configured_retries() {
        let config = Config {
            max_retries: 2,
            ..Config::default()
        };
        let (fetcher, transport) = scripted(config, vec![Step::Status(500), Step::Status(500)]);

        let outcome = fetcher.fetch_feed("https://example.com/feed").await;

        assert!(matches!(
            outcome.error(),
            Some(FetchError::RetriesExhausted { attempts: 2, .. })
        ));
        assert_eq!(transport.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_disabled_by_config() {
        let config = Config {
            cache_enabled: false,
            ..Config::default()
        };
        let body = Step::Body(VALID_RSS, "application/rss+xml");
        let (fetcher, transport) = scripted(config, vec![body.clone(), body]);

        assert!(fetcher.fetch_feed("https://example.com/feed").await.is_success());
        assert!(fetcher.fetch_feed("https://example.com/feed").await.is_success());

        assert_eq!(transport.calls().len(), 2);
        assert!(!fetcher.cache().is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_and_batch_share_cache() {
        let (fetcher, transport) = scripted(
            Config::default(),
            vec![Step::Body(VALID_RSS, "application/rss+xml")],
        );

        assert!(fetcher.fetch_feed("https://example.com/feed").await.is_success());
        let batch = fetcher
            .fetch_multiple(["https://example.com/feed"], None)
            .await;

        assert!(batch["https://example.com/feed"].is_success());
        assert_eq!(transport.calls().len(), 1);
        assert_eq!(fetcher.limiter().admitted_total(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_fetches() {
        let (fetcher, transport) = scripted(Config::default(), Vec::new());
        fetcher.shutdown();

        let outcome = fetcher.fetch_feed("https://example.com/feed").await;
        assert_eq!(outcome.error(), Some(&FetchError::Cancelled));

        let batch = fetcher.fetch_multiple(["https://a.example/rss"], None).await;
        assert!(batch["https://a.example/rss"].outcome().is_none());
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn test_zero_workers_config_is_normalized() {
        let config = Config {
            max_workers: 0,
            ..Config::default()
        };
        let (fetcher, _) = scripted(config, Vec::new());
        assert_eq!(fetcher.workers(), 1);
    }
}
