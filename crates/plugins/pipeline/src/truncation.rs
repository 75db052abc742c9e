//! Truncation utilities for limiting output size.
//!
//! Build results are short; console logs are not. Logs are cut from the
//! front because the interesting part of a failed build is at the end.

/// Truncate a string to max_chars, preserving word boundaries.
/// The returned string will be at most max_chars long (including ellipsis).
pub fn truncate_string(s: &str, max_chars: usize) -> String {
    if s.len() <= max_chars {
        return s.to_string();
    }

    // Account for ellipsis in the limit
    let content_limit = floor_boundary(s, max_chars.saturating_sub(3));
    if content_limit == 0 {
        return "...".to_string();
    }

    let truncated = &s[..content_limit];

    // Try to break at newline first
    if let Some(pos) = truncated.rfind('\n') {
        if pos > content_limit / 2 {
            return format!("{}...", &s[..pos]);
        }
    }

    // Fall back to word boundary
    if let Some(pos) = truncated.rfind(' ') {
        if pos > content_limit / 2 {
            return format!("{}...", &s[..pos]);
        }
    }

    // Hard truncate if no good boundary found
    format!("{}...", truncated)
}

/// Cut a log from the front so that at most `max_chars` remain, starting at
/// a line boundary when possible.
pub fn truncate_log_head(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_string();
    }

    let mut start = ceil_boundary(text, text.len() - max_chars);
    if let Some(pos) = text[start..].find('\n') {
        if pos < max_chars / 2 {
            start += pos + 1;
        }
    }

    let hidden = text[..start].lines().count();
    format!("... [{} lines hidden] ...\n{}", hidden, &text[start..])
}

fn floor_boundary(s: &str, mut index: usize) -> usize {
    index = index.min(s.len());
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_boundary(s: &str, mut index: usize) -> usize {
    while index < s.len() && !s.is_char_boundary(index) {
        index += 1;
    }
    index
}
