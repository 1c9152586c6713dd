//! Character-safe truncation helpers.

/// Truncate `s` to at most `max_bytes` bytes without splitting a codepoint.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let mut cutoff = max_bytes;
    while cutoff > 0 && !s.is_char_boundary(cutoff) {
        cutoff -= 1;
    }
    &s[..cutoff]
}

/// Truncate `s` to at most `max_chars` characters, appending `marker` when
/// anything was cut. The marker counts toward the limit.
pub fn truncate_chars(s: &str, max_chars: usize, marker: &str) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(marker.chars().count());
    let mut out: String = s.chars().take(keep).collect();
    out.push_str(marker);
    out
}
