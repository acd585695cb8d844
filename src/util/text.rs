use std::borrow::Cow;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const ELLIPSIS: &str = "...";
const ELLIPSIS_WIDTH: usize = 3;

/// Terminal columns occupied by `s` (CJK and emoji count as two).
///
/// ```
/// use feedpull::util::display_width;
///
/// assert_eq!(display_width("Hello"), 5);
/// assert_eq!(display_width("日本"), 4);
/// ```
pub fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

/// Truncates `s` to at most `max_width` terminal columns, ending in `...`
/// when text was cut.
///
/// Widths of 3 or less have no room for the ellipsis, so as many whole
/// characters as fit are returned instead. Never splits a character.
///
/// ```
/// use feedpull::util::truncate_to_width;
///
/// assert_eq!(truncate_to_width("Short", 10), "Short");
/// assert_eq!(truncate_to_width("Hello World", 8), "Hello...");
/// assert_eq!(truncate_to_width("Test", 2), "Te");
/// ```
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if display_width(s) <= max_width {
        return Cow::Borrowed(s);
    }
    if max_width <= ELLIPSIS_WIDTH {
        return Cow::Owned(s[..fit_columns(s, max_width)].to_string());
    }

    let cut = fit_columns(s, max_width - ELLIPSIS_WIDTH);
    Cow::Owned(format!("{}{}", &s[..cut], ELLIPSIS))
}

/// Byte index of the longest prefix of `s` that fits in `columns`.
fn fit_columns(s: &str, columns: usize) -> usize {
    let mut used = 0;
    for (idx, c) in s.char_indices() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if used + w > columns {
            return idx;
        }
        used += w;
    }
    s.len()
}

/// Keeps the first `max_chars` characters of `s`, appending `...` only when
/// something was dropped.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => Cow::Owned(format!("{}{}", &s[..idx], ELLIPSIS)),
        None => Cow::Borrowed(s),
    }
}

/// Tab, newline and carriage return survive; every other C0 control and DEL
/// is stripped.
fn is_stripped_control(b: u8) -> bool {
    b == 0x7f || (b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r'))
}

/// SEC-001: Removes terminal control characters and ANSI escape sequences
/// from feed-supplied text before it is printed.
///
/// CSI (`ESC [` ... final byte) and OSC (`ESC ]` ... BEL or `ESC \`)
/// sequences are dropped whole; a lone ESC is dropped by itself.
/// Clean input is returned borrowed.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    if !bytes.iter().any(|&b| b == 0x1b || is_stripped_control(b)) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            0x1b => i = skip_escape(bytes, i),
            b if is_stripped_control(b) => i += 1,
            _ => {
                let start = i;
                while i < bytes.len() && bytes[i] != 0x1b && !is_stripped_control(bytes[i]) {
                    i += 1;
                }
                // Only ASCII bytes end the run, so the slice is on char boundaries
                out.push_str(&s[start..i]);
            }
        }
    }
    Cow::Owned(out)
}

/// Returns the index just past the escape sequence starting at `start`.
fn skip_escape(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    match bytes.get(i) {
        Some(b'[') => {
            i += 1;
            while let Some(&c) = bytes.get(i) {
                i += 1;
                if (0x40..=0x7e).contains(&c) {
                    break;
                }
            }
            i
        }
        Some(b']') => {
            i += 1;
            while let Some(&c) = bytes.get(i) {
                if c == 0x07 {
                    return i + 1;
                }
                if c == 0x1b && bytes.get(i + 1) == Some(&b'\\') {
                    return i + 2;
                }
                i += 1;
            }
            i
        }
        _ => i,
    }
}
