//! Plain-text console summary of a fetched feed.

use super::export::FeedSnapshot;
use super::ParsedFeed;
use crate::util::{strip_control_chars, truncate_chars, truncate_to_width};

const RULE_WIDTH: usize = 70;
const DESCRIPTION_CHARS: usize = 100;
const SUMMARY_CHARS: usize = 150;

/// Line printed in place of a summary when a fetch produced nothing.
pub const NO_DATA: &str = "No data could be fetched.";

/// Renders a feed header (title, link, description, updated, entry count)
/// followed by the first `show_entries` entries.
///
/// All feed-supplied text is stripped of terminal control sequences.
/// Empty optional fields (updated, published, summary) are omitted.
pub fn format_summary(feed: Option<&ParsedFeed>, show_entries: usize) -> String {
    let Some(feed) = feed else {
        return format!("{NO_DATA}\n");
    };
    let snapshot = FeedSnapshot::from_feed(feed, None);
    let info = &snapshot.feed_info;
    let rule = "=".repeat(RULE_WIDTH);

    let mut lines = vec![
        rule.clone(),
        format!("Title:       {}", or_placeholder(&info.title, "(untitled)")),
        format!("Link:        {}", or_placeholder(&info.link, "(no link)")),
        format!(
            "Description: {}",
            truncate_chars(&clean(&info.description), DESCRIPTION_CHARS)
        ),
    ];
    if !info.updated.is_empty() {
        lines.push(format!("Updated:     {}", info.updated));
    }
    lines.push(format!("Entries:     {}", snapshot.entries.len()));
    lines.push(rule);
    lines.push(String::new());

    let shown = show_entries.min(snapshot.entries.len());
    lines.push(format!("Latest {shown} entries:"));
    for (i, entry) in snapshot.entries.iter().take(shown).enumerate() {
        let title = or_placeholder(&entry.title, "(untitled)");
        lines.push(String::new());
        lines.push(format!(
            "{}. {}",
            i + 1,
            truncate_to_width(&title, RULE_WIDTH - 4)
        ));
        lines.push(format!("   {}", clean(&entry.link)));
        if !entry.published.is_empty() {
            lines.push(format!("   {}", entry.published));
        }
        if !entry.summary.is_empty() {
            let summary = clean(&entry.summary).replace(['\n', '\r'], " ");
            lines.push(format!("   {}", truncate_chars(&summary, SUMMARY_CHARS)));
        }
        lines.push("-".repeat(RULE_WIDTH));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn clean(text: &str) -> String {
    strip_control_chars(text.trim()).into_owned()
}

fn or_placeholder(text: &str, placeholder: &str) -> String {
    let cleaned = clean(text);
    if cleaned.is_empty() {
        placeholder.to_string()
    } else {
        cleaned
    }
}
