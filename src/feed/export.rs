use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use feed_rs::model::{Entry, Feed, Link};
use serde::Serialize;

use super::ParsedFeed;

/// Entry summaries in exported JSON are cut to this many characters.
pub const EXPORT_SUMMARY_CHARS: usize = 200;

/// Flattened, string-only view of a feed: the shape written by
/// [`export_to_json`] and read by the console summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedSnapshot {
    pub feed_info: FeedInfo,
    pub entries: Vec<EntryInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedInfo {
    pub title: String,
    pub link: String,
    pub description: String,
    pub updated: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub title: String,
    pub link: String,
    pub published: String,
    pub summary: String,
}

impl FeedSnapshot {
    /// Builds the snapshot. `summary_chars` caps each entry summary; `None`
    /// keeps it whole. Missing fields become empty strings.
    pub fn from_feed(feed: &ParsedFeed, summary_chars: Option<usize>) -> Self {
        let doc: &Feed = &feed.document;
        Self {
            feed_info: FeedInfo {
                title: text_or_empty(doc.title.as_ref().map(|t| t.content.as_str())),
                link: first_link(&doc.links),
                description: text_or_empty(doc.description.as_ref().map(|t| t.content.as_str())),
                updated: timestamp(doc.updated),
            },
            entries: doc
                .entries
                .iter()
                .map(|entry| EntryInfo::from_entry(entry, summary_chars))
                .collect(),
        }
    }
}

impl EntryInfo {
    fn from_entry(entry: &Entry, summary_chars: Option<usize>) -> Self {
        // Atom entries often carry only <content>; use it when there is no summary
        let summary = entry
            .summary
            .as_ref()
            .map(|t| t.content.as_str())
            .or_else(|| entry.content.as_ref().and_then(|c| c.body.as_deref()))
            .unwrap_or_default();
        let summary = match summary_chars {
            Some(limit) => summary.chars().take(limit).collect(),
            None => summary.to_string(),
        };

        Self {
            title: text_or_empty(entry.title.as_ref().map(|t| t.content.as_str())),
            link: first_link(&entry.links),
            published: timestamp(entry.published.or(entry.updated)),
            summary,
        }
    }
}

/// RFC 3339 in UTC, or an empty string when the feed gave no date.
fn timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|d| d.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default()
}

fn text_or_empty(text: Option<&str>) -> String {
    text.map(str::trim).unwrap_or_default().to_string()
}

/// Prefers the `alternate` link, as RSS `<link>` and Atom `rel="alternate"` do.
fn first_link(links: &[Link]) -> String {
    links
        .iter()
        .find(|l| l.rel.as_deref().map_or(true, |rel| rel == "alternate"))
        .or_else(|| links.first())
        .map(|l| l.href.clone())
        .unwrap_or_default()
}

/// Serializes the export document as pretty-printed JSON (non-ASCII kept as is).
pub fn to_json_string(feed: &ParsedFeed) -> Result<String> {
    let snapshot = FeedSnapshot::from_feed(feed, Some(EXPORT_SUMMARY_CHARS));
    serde_json::to_string_pretty(&snapshot).context("Failed to serialize feed to JSON")
}

/// Exports a feed to a JSON file atomically.
///
/// Writes to a temporary file in the same directory, syncs it to disk, then
/// renames it over `path`, so the destination is never left half written.
pub fn export_to_json(feed: &ParsedFeed, path: &Path) -> Result<()> {
    use std::time::{SystemTime, UNIX_EPOCH};

    let content = to_json_string(feed)?;

    // SEC-009: Randomized temp filename to prevent TOCTOU race conditions
    let random_suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let temp_path = path.with_extension(format!("tmp.{:016x}", random_suffix));

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .with_context(|| {
            format!(
                "Failed to create temporary file '{}': check directory permissions",
                temp_path.display()
            )
        })?;

    std::io::Write::write_all(&mut file, content.as_bytes()).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!("Failed to write JSON to '{}'", temp_path.display())
    })?;

    file.sync_all().with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!("Failed to sync '{}' to disk", temp_path.display())
    })?;

    drop(file);

    std::fs::rename(&temp_path, path).with_context(|| {
        let _ = std::fs::remove_file(&temp_path);
        format!(
            "Failed to rename '{}' to '{}'",
            temp_path.display(),
            path.display()
        )
    })?;

    tracing::info!(
        path = %path.display(),
        entries = feed.entry_count(),
        "Exported feed to JSON"
    );
    Ok(())
}
