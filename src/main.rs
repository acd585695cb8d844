use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use feedpull::feed::format_summary;
use feedpull::{BatchEntry, Config, FetchOutcome, FetchProgress, RssFetcher};

#[derive(Parser, Debug)]
#[command(
    name = "feedpull",
    version,
    about = "Fetch RSS/Atom feeds with retries, rate limiting and caching"
)]
struct Args {
    /// Feed URLs to fetch
    urls: Vec<String>,

    /// Also fetch every feed listed in an OPML file
    #[arg(long, value_name = "FILE")]
    opml: Option<PathBuf>,

    /// Only fetch feeds from this OPML category
    #[arg(long, value_name = "NAME", requires = "opml")]
    category: Option<String>,

    /// Export the first successfully fetched feed as JSON
    #[arg(long, value_name = "FILE")]
    json: Option<PathBuf>,

    /// Entries to show per feed
    #[arg(long, value_name = "N", default_value_t = 5)]
    entries: usize,

    /// Disable the in-process response cache
    #[arg(long)]
    no_cache: bool,

    /// Concurrent fetches (overrides config)
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// Attempts per feed (overrides config)
    #[arg(long, value_name = "N")]
    retries: Option<u32>,

    /// Config file (default: ~/.config/feedpull/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl Args {
    fn load_config(&self) -> Result<Config> {
        let mut config = match self.config.clone().or_else(Config::default_path) {
            Some(path) => Config::load(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => Config::default(),
        };

        if self.no_cache {
            config.cache_enabled = false;
        }
        if let Some(workers) = self.workers {
            config.max_workers = workers;
        }
        if let Some(retries) = self.retries {
            config.max_retries = retries;
        }
        Ok(config.normalized())
    }
}

/// Positional URLs first, then OPML feeds, in order.
async fn collect_urls(args: &Args, fetcher: &RssFetcher) -> Result<Vec<String>> {
    let mut urls = args.urls.clone();

    if let Some(opml) = &args.opml {
        let categories = fetcher.parse_opml(opml).await;
        if categories.is_empty() {
            eprintln!("Warning: No feeds found in {}", opml.display());
        }

        match &args.category {
            Some(name) => {
                let Some(feeds) = categories.get(name) else {
                    let known: Vec<&str> = categories.keys().map(String::as_str).collect();
                    anyhow::bail!(
                        "Category '{}' not found in {} (available: {})",
                        name,
                        opml.display(),
                        known.join(", ")
                    );
                };
                urls.extend(feeds.iter().map(|f| f.url.clone()));
            }
            None => {
                for (name, feeds) in &categories {
                    println!("{name}: {} feeds", feeds.len());
                    urls.extend(feeds.iter().map(|f| f.url.clone()));
                }
            }
        }
    }

    Ok(urls)
}

/// Prints one line per finished feed to stderr.
fn spawn_progress_printer() -> (mpsc::Sender<FetchProgress>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<FetchProgress>(32);
    let handle = tokio::spawn(async move {
        while let Some(p) = rx.recv().await {
            let status = if p.succeeded { "ok" } else { "FAILED" };
            eprintln!("[{}/{}] {:<6} {}", p.done, p.total, status, p.url);
        }
    });
    (tx, handle)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so summaries on stdout stay clean
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.load_config()?;
    let fetcher = RssFetcher::from_config(&config)?;

    let urls = collect_urls(&args, &fetcher).await?;
    if urls.is_empty() {
        anyhow::bail!("Nothing to fetch: pass feed URLs or --opml FILE");
    }

    let cancel = fetcher.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, stopping fetches...");
            cancel.cancel();
        }
    });

    let (progress_tx, printer) = spawn_progress_printer();
    let mut results = fetcher.fetch_multiple(urls.iter().cloned(), Some(progress_tx)).await;
    // All senders are gone once the batch returns
    let _ = printer.await;

    let mut seen = std::collections::HashSet::new();
    let ordered: Vec<(String, BatchEntry)> = urls
        .into_iter()
        .filter(|url| seen.insert(url.clone()))
        .filter_map(|url| results.remove(&url).map(|entry| (url, entry)))
        .collect();

    for (url, entry) in &ordered {
        println!("\n{url}");
        match entry {
            BatchEntry::Completed(FetchOutcome::Success(feed)) => {
                if let Some(warning) = &feed.warning {
                    eprintln!("Warning: {url} is malformed: {warning}");
                }
                print!("{}", format_summary(Some(feed), args.entries));
            }
            BatchEntry::Completed(FetchOutcome::Failure(err)) => {
                eprintln!("Error: {url}: {err}");
                print!("{}", format_summary(None, args.entries));
            }
            BatchEntry::Unreached => {
                eprintln!("Skipped: {url} (cancelled before it started)");
            }
        }
    }

    let succeeded = ordered.iter().filter(|(_, e)| e.is_success()).count();
    println!("\nSucceeded: {}/{}", succeeded, ordered.len());

    if let Some(path) = &args.json {
        let first = ordered
            .iter()
            .find_map(|(_, entry)| entry.outcome().and_then(FetchOutcome::feed));
        match first {
            Some(feed) => {
                fetcher
                    .export_to_json(feed, path)
                    .context("JSON export failed")?;
                println!("Exported JSON to {}", path.display());
            }
            None => eprintln!("No feed to export."),
        }
    }

    Ok(())
}
