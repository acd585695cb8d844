use std::sync::Arc;

use feed_rs::model::Feed;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// Errors produced when a response body cannot be turned into a feed at all.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The body is not an RSS/Atom/JSON feed, even after repair.
    #[error("Feed parse error: {0}")]
    Invalid(String),
}

/// A parsed feed document plus the structural diagnostics gathered while parsing.
///
/// `malformed` marks a document that parsed with warnings (undefined entities,
/// bare ampersands, mismatched tags). It is still usable and is never a
/// failure by itself.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub document: Arc<Feed>,
    pub malformed: bool,
    pub warning: Option<String>,
}

impl ParsedFeed {
    pub fn title(&self) -> Option<&str> {
        self.document.title.as_ref().map(|t| t.content.as_str())
    }

    pub fn entry_count(&self) -> usize {
        self.document.entries.len()
    }
}

/// Turns raw response bytes into a [`ParsedFeed`].
///
/// Implementations must be cheap to share across workers; the executor holds
/// one behind an `Arc` for the whole process.
pub trait FeedParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFeed, ParseError>;
}

/// Production parser backed by `feed-rs`, with a `quick-xml` well-formedness
/// pass that reports structural problems without rejecting the document.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeedRsParser;

impl FeedParser for FeedRsParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
        let warning = scan_structure(bytes);

        match feed_rs::parser::parse(bytes) {
            Ok(feed) => Ok(ParsedFeed {
                document: Arc::new(feed),
                malformed: warning.is_some(),
                warning,
            }),
            Err(err) => {
                // Only attempt repair when the scan already saw a structural problem
                if warning.is_some() {
                    if let Some(repaired) = escape_bare_ampersands(bytes) {
                        if let Ok(feed) = feed_rs::parser::parse(repaired.as_slice()) {
                            tracing::debug!(error = %err, "Recovered feed after escaping bare ampersands");
                            return Ok(ParsedFeed {
                                document: Arc::new(feed),
                                malformed: true,
                                warning,
                            });
                        }
                    }
                }
                Err(ParseError::Invalid(err.to_string()))
            }
        }
    }
}

/// Walks the document with `quick-xml` and returns the first structural
/// problem found, or `None` when the XML is well formed.
///
/// Text nodes are unescaped so undefined entities and bare `&` are reported.
/// Non-XML bodies (JSON Feed) simply produce no warning.
fn scan_structure(bytes: &[u8]) -> Option<String> {
    let mut reader = Reader::from_reader(bytes);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Text(text)) => {
                if let Err(e) = text.unescape() {
                    return Some(format!(
                        "invalid character data near byte {}: {}",
                        reader.buffer_position(),
                        e
                    ));
                }
            }
            Ok(Event::Eof) => return None,
            Err(e) => {
                return Some(format!(
                    "XML error near byte {}: {}",
                    reader.buffer_position(),
                    e
                ));
            }
            _ => {}
        }
        buf.clear();
    }
}

/// Rewrites `&` characters that do not start an entity or character
/// reference as `&amp;`. CDATA sections are copied through untouched.
///
/// Returns `None` when the body is not UTF-8 or nothing needed escaping.
fn escape_bare_ampersands(bytes: &[u8]) -> Option<Vec<u8>> {
    const CDATA_OPEN: &str = "<![CDATA[";
    const CDATA_CLOSE: &str = "]]>";

    let text = std::str::from_utf8(bytes).ok()?;
    let mut out = String::with_capacity(text.len() + 16);
    let mut changed = false;
    let mut rest = text;

    while let Some(idx) = rest.find(['&', '<']) {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];

        if tail.starts_with(CDATA_OPEN) {
            let end = tail
                .find(CDATA_CLOSE)
                .map(|e| e + CDATA_CLOSE.len())
                .unwrap_or(tail.len());
            out.push_str(&tail[..end]);
            rest = &tail[end..];
        } else if tail.starts_with('<') {
            out.push('<');
            rest = &tail[1..];
        } else if starts_with_reference(tail) {
            out.push('&');
            rest = &tail[1..];
        } else {
            out.push_str("&amp;");
            changed = true;
            rest = &tail[1..];
        }
    }
    out.push_str(rest);

    changed.then(|| out.into_bytes())
}

/// True when `s` (which starts with `&`) begins a well-formed reference:
/// `&name;`, `&#123;` or `&#x1F;`.
fn starts_with_reference(s: &str) -> bool {
    let body = &s[1..];
    let Some(end) = body.find(';') else {
        return false;
    };
    let name = &body[..end];

    if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        return !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit());
    }
    if let Some(dec) = name.strip_prefix('#') {
        return !dec.is_empty() && dec.chars().all(|c| c.is_ascii_digit());
    }

    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        }
        _ => false,
    }
}
