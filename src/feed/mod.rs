//! Feed documents: parsing, subscription import, and output.
//!
//! - [`parser`] - Bytes to [`ParsedFeed`] via `feed-rs`, tolerating malformed XML
//! - [`opml`] - OPML subscription lists grouped by category
//! - [`export`] - JSON export of a fetched feed
//! - [`display`] - Console summary of a fetched feed
//!
//! Nothing here touches the network; see [`crate::fetch`] for that.

pub mod display;
pub mod export;
pub mod opml;
mod parser;

pub use display::format_summary;
pub use export::{export_to_json, to_json_string, EntryInfo, FeedInfo, FeedSnapshot};
pub use opml::{parse_opml, parse_opml_content, OpmlCategories, OpmlError, OpmlFeed};
pub use parser::{FeedParser, FeedRsParser, ParseError, ParsedFeed};
