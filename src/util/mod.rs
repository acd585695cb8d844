//! Small helpers shared by the feed and CLI layers.
//!
//! - **URL validation**: SSRF policy for URLs imported from subscription lists
//! - **Text processing**: width-aware truncation and control-character stripping
//!   for printing feed-supplied text to a terminal

mod text;
mod url_validator;

pub use text::{display_width, strip_control_chars, truncate_chars, truncate_to_width};
pub use url_validator::{validate_url, UrlValidationError};
