use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use thiserror::Error;

use crate::util::validate_url;

/// SEC-003: Maximum allowed nesting depth for OPML outline elements.
/// Prevents stack overflow attacks from maliciously crafted deeply nested OPMLs.
const MAX_OPML_DEPTH: usize = 50;

/// Feed kind recorded when an outline carries no `type` attribute.
const DEFAULT_KIND: &str = "rss";

/// Errors that can occur during OPML parsing.
#[derive(Debug, Error)]
pub enum OpmlError {
    /// SEC-003: OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// XML parsing failed.
    #[error("XML parse error: {0}")]
    XmlParse(String),

    /// File I/O error.
    #[error("Failed to read OPML file: {0}")]
    Io(#[from] std::io::Error),
}

/// A feed subscription listed under an OPML category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpmlFeed {
    /// Sourced from `text`, falling back to `title`, then the URL itself.
    pub title: String,
    /// Feed URL from `xmlUrl`. Validated to be HTTP(S) and not pointing to
    /// localhost or private IP ranges.
    pub url: String,
    /// The outline's `type` attribute, `"rss"` when absent.
    pub kind: String,
}

/// Category name to the feeds listed directly beneath it, in document order.
pub type OpmlCategories = BTreeMap<String, Vec<OpmlFeed>>;

/// Reads an OPML file and groups its feeds by category.
///
/// Never fails: unreadable or malformed files are logged and yield an empty
/// map, so a bad subscription list degrades to "nothing to fetch".
pub async fn parse_opml(path: &Path) -> OpmlCategories {
    match read_opml(path).await {
        Ok(categories) => categories,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %format!("{e:#}"), "OPML parse failed");
            OpmlCategories::new()
        }
    }
}

async fn read_opml(path: &Path) -> Result<OpmlCategories> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read OPML file: {}", path.display()))?;
    Ok(parse_opml_content(&content)?)
}

/// One open `<outline>` element while walking the document.
struct OpenOutline {
    /// Category name, when the outline carries a `text` attribute.
    name: Option<String>,
    has_children: bool,
    feeds: Vec<OpmlFeed>,
}

/// Parses OPML content and groups feeds by category.
///
/// Any outline (at any depth) that has a `text` attribute and at least one
/// child outline is a category. Its feeds are the direct children carrying an
/// `xmlUrl`; deeper descendants belong to their own nearest category.
/// Feeds outside any category are not returned. A category that appears
/// twice has its feed lists merged.
///
/// # Security
///
/// - SEC-002: quick-xml (0.37) never parses `<!ENTITY>` declarations, and
///   `decode_and_unescape_value()` only resolves the five XML builtins, so
///   custom entities are rejected rather than expanded.
/// - URLs are validated to prevent SSRF against localhost and private networks.
pub fn parse_opml_content(content: &str) -> Result<OpmlCategories, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut categories = OpmlCategories::new();
    // SEC-003: the stack length is the current nesting depth
    let mut stack: Vec<OpenOutline> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                if stack.len() >= MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                let outline = read_outline(&e, &reader)?;
                attach_to_parent(&mut stack, &outline);
                stack.push(OpenOutline {
                    name: outline.category_name(),
                    has_children: false,
                    feeds: Vec::new(),
                });
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                // Self-closing outline has no children, so it is never a category
                let outline = read_outline(&e, &reader)?;
                attach_to_parent(&mut stack, &outline);
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                if let Some(closed) = stack.pop() {
                    if let (Some(name), true) = (closed.name, closed.has_children) {
                        categories.entry(name).or_default().extend(closed.feeds);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
    }

    tracing::debug!(categories = categories.len(), "Parsed OPML categories");
    Ok(categories)
}

/// Attributes of interest on a single `<outline>` element.
#[derive(Debug, Default)]
struct OutlineAttrs {
    text: Option<String>,
    title: Option<String>,
    xml_url: Option<String>,
    kind: Option<String>,
}

impl OutlineAttrs {
    fn category_name(&self) -> Option<String> {
        let text = self.text.as_ref()?;
        if text.is_empty() {
            return Some(self.title.clone().unwrap_or_default());
        }
        Some(text.clone())
    }

    /// Returns the feed this outline describes, if it has a valid `xmlUrl`.
    fn feed(&self) -> Option<OpmlFeed> {
        let url = self.xml_url.as_ref()?;
        if let Err(e) = validate_url(url) {
            tracing::warn!(url = %url, error = %e, "Skipping invalid feed URL");
            return None;
        }
        let title = [&self.text, &self.title]
            .into_iter()
            .flatten()
            .find(|t| !t.is_empty())
            .cloned()
            .unwrap_or_else(|| url.clone());
        Some(OpmlFeed {
            title,
            url: url.clone(),
            kind: self
                .kind
                .clone()
                .unwrap_or_else(|| DEFAULT_KIND.to_string()),
        })
    }
}

fn attach_to_parent(stack: &mut [OpenOutline], outline: &OutlineAttrs) {
    let Some(parent) = stack.last_mut() else {
        return;
    };
    parent.has_children = true;
    if parent.name.is_some() {
        if let Some(feed) = outline.feed() {
            parent.feeds.push(feed);
        }
    }
}

fn read_outline(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<OutlineAttrs, OpmlError> {
    let mut attrs = OutlineAttrs::default();
    let decoder = reader.decoder();

    for attr_result in e.attributes() {
        let attr = match attr_result {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let slot = match attr.key.as_ref() {
            b"text" => &mut attrs.text,
            b"title" => &mut attrs.title,
            b"xmlUrl" => &mut attrs.xml_url,
            b"type" => &mut attrs.kind,
            _ => continue,
        };
        let value = attr
            .decode_and_unescape_value(decoder)
            .map_err(|e| OpmlError::XmlParse(e.to_string()))?;
        *slot = Some(value.into_owned());
    }

    Ok(attrs)
}
