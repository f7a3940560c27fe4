use std::borrow::Cow;

use unicode_width::UnicodeWidthChar;

const ELLIPSIS: &str = "...";

/// Cut `s` so it occupies at most `max_width` terminal columns, ending in `...`
/// when anything was dropped.
///
/// Widths of 3 or less have no room for the ellipsis; the prefix that fits is
/// returned as is.
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    let mut width = 0;
    let mut fits_end = None;
    let mut ellipsis_cut = 0;
    let room = max_width.saturating_sub(ELLIPSIS.len());

    for (idx, c) in s.char_indices() {
        let w = c.width().unwrap_or(0);
        if width + w <= room {
            ellipsis_cut = idx + c.len_utf8();
        }
        if width + w > max_width {
            fits_end = Some(idx);
            break;
        }
        width += w;
    }

    match fits_end {
        None => Cow::Borrowed(s),
        Some(end) if max_width <= ELLIPSIS.len() => Cow::Owned(s[..end].to_string()),
        Some(_) => Cow::Owned(format!("{}{}", &s[..ellipsis_cut], ELLIPSIS)),
    }
}

/// SEC-001: Remove terminal control characters and ANSI escape sequences.
///
/// Names typed by the user and titles coming from remote feeds both end up
/// on a terminal, so CSI (`ESC [ ... final`) and OSC (`ESC ] ... BEL|ST`)
/// sequences are dropped whole along with other C0 controls and DEL.
/// Tab, newline and carriage return are kept.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let needs_strip = s.chars().any(is_stripped);
    if !needs_strip {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\x1b' {
            if !is_stripped(c) {
                out.push(c);
            }
            continue;
        }
        match chars.peek() {
            Some('[') => {
                chars.next();
                for c in chars.by_ref() {
                    if ('\x40'..='\x7e').contains(&c) {
                        break;
                    }
                }
            }
            Some(']') => {
                chars.next();
                while let Some(c) = chars.next() {
                    if c == '\x07' {
                        break;
                    }
                    if c == '\x1b' && chars.peek() == Some(&'\\') {
                        chars.next();
                        break;
                    }
                }
            }
            _ => {}
        }
    }
    Cow::Owned(out)
}

fn is_stripped(c: char) -> bool {
    c == '\x7f' || (c < '\x20' && !matches!(c, '\t' | '\n' | '\r'))
}
