use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use super::error::FetchError;
use super::executor::{FeedRequest, FetchExecutor, FetchOutcome, DEFAULT_MAX_RETRIES};

pub const DEFAULT_WORKERS: usize = 5;

/// What a batch knows about one URL.
#[derive(Debug, Clone)]
pub enum BatchEntry {
    /// The executor ran (or its task panicked, reported as `Unexpected`)
    Completed(FetchOutcome),
    /// Never dispatched, e.g. the batch was cancelled first
    Unreached,
}

impl BatchEntry {
    pub fn outcome(&self) -> Option<&FetchOutcome> {
        match self {
            BatchEntry::Completed(outcome) => Some(outcome),
            BatchEntry::Unreached => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome().is_some_and(FetchOutcome::is_success)
    }
}

/// One entry per distinct input URL. Iteration order is unspecified.
pub type BatchResult = HashMap<String, BatchEntry>;

/// Sent once per URL as it finishes, in completion order.
#[derive(Debug, Clone)]
pub struct FetchProgress {
    pub url: String,
    pub done: usize,
    pub total: usize,
    pub succeeded: bool,
}

/// Bounded-concurrency fan-out of [`FetchExecutor`] over a batch of URLs.
///
/// Every worker shares the executor's rate limiter and cache. Each URL runs
/// in its own spawned task, so a panic while fetching one URL is contained
/// to that URL's entry.
#[derive(Clone)]
pub struct FetchOrchestrator {
    executor: FetchExecutor,
    workers: usize,
    max_retries: u32,
}

impl FetchOrchestrator {
    pub fn new(executor: FetchExecutor, workers: usize) -> Self {
        Self {
            executor,
            workers: workers.max(1),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Attempt budget used for every URL in a batch.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn executor(&self) -> &FetchExecutor {
        &self.executor
    }

    pub async fn fetch_all<I, S>(&self, urls: I, cancel: &CancellationToken) -> BatchResult
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fetch_all_with_progress(urls, cancel, None).await
    }

    /// Fetches every URL with at most `workers` in flight at once.
    ///
    /// # Arguments
    ///
    /// * `urls` - Feed URLs; duplicates are fetched once
    /// * `cancel` - Stops new dispatches and cuts in-flight fetches short
    /// * `progress_tx` - Optional channel receiving a [`FetchProgress`] per URL
    ///
    /// The progress channel must be drained while the batch runs: once its
    /// buffer is full, workers wait on it. Cancelling `cancel` releases
    /// them and the remaining updates are dropped.
    ///
    /// # Returns
    ///
    /// A [`BatchResult`] with exactly one entry per distinct URL. URLs still
    /// queued when `cancel` fires are [`BatchEntry::Unreached`].
    pub async fn fetch_all_with_progress<I, S>(
        &self,
        urls: I,
        cancel: &CancellationToken,
        progress_tx: Option<mpsc::Sender<FetchProgress>>,
    ) -> BatchResult
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let unique: Vec<String> = urls
            .into_iter()
            .map(Into::into)
            .filter(|url: &String| seen.insert(url.clone()))
            .collect();

        if unique.is_empty() {
            return BatchResult::new();
        }

        let total = unique.len();
        let completed = Arc::new(AtomicUsize::new(0));
        tracing::info!(total = total, workers = self.workers, "Starting batch fetch");

        let entries: Vec<(String, BatchEntry)> = stream::iter(unique)
            .map(|url| {
                let executor = self.executor.clone();
                let cancel = cancel.clone();
                let progress_tx = progress_tx.clone();
                let completed = completed.clone();
                let max_retries = self.max_retries;

                async move {
                    let entry = if cancel.is_cancelled() {
                        BatchEntry::Unreached
                    } else {
                        let request = FeedRequest::new(url.clone()).max_retries(max_retries);
                        run_worker(executor, request, cancel.clone()).await
                    };

                    let done = completed.fetch_add(1, Ordering::Relaxed).saturating_add(1);
                    if let Some(tx) = &progress_tx {
                        let progress = FetchProgress {
                            url: url.clone(),
                            done,
                            total,
                            succeeded: entry.is_success(),
                        };
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                tracing::debug!(done = done, total = total, "Batch cancelled, dropping progress update");
                            }
                            sent = tx.send(progress) => {
                                if let Err(e) = sent {
                                    tracing::warn!(error = %e, done = done, total = total, "Progress channel send failed (receiver dropped)");
                                }
                            }
                        }
                    }

                    (url, entry)
                }
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        let succeeded = entries.iter().filter(|(_, e)| e.is_success()).count();
        tracing::info!(total = total, succeeded = succeeded, "Batch fetch finished");

        entries.into_iter().collect()
    }
}

/// Aborts the wrapped task when dropped, so a batch future dropped by its
/// caller does not leave fetches running in the background.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs one fetch on its own task so a panic stays inside this URL's entry.
async fn run_worker(
    executor: FetchExecutor,
    request: FeedRequest,
    cancel: CancellationToken,
) -> BatchEntry {
    let url = request.url.clone();
    let handle = tokio::spawn(async move { executor.fetch(&request, &cancel).await });
    let _guard = AbortOnDrop(handle.abort_handle());

    match handle.await {
        Ok(outcome) => BatchEntry::Completed(outcome),
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            tracing::error!(url = %url, panic = %message, "Fetch worker panicked");
            BatchEntry::Completed(FetchOutcome::Failure(FetchError::Unexpected(format!(
                "worker panicked: {message}"
            ))))
        }
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Fetch worker was cancelled");
            BatchEntry::Unreached
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
