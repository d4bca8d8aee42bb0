/// Longest prefix of `value` that fits in `max_bytes` without splitting a
/// UTF-8 sequence.
pub fn truncate_utf8_prefix(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// Caps `value` at `max_bytes` and appends `marker` when anything was cut.
/// Returns the capped text and whether truncation happened.
pub fn truncate_with_marker(value: &str, max_bytes: usize, marker: &str) -> (String, bool) {
    if value.len() <= max_bytes {
        return (value.to_string(), false);
    }
    let mut out = String::with_capacity(max_bytes + marker.len());
    out.push_str(truncate_utf8_prefix(value, max_bytes));
    out.push_str(marker);
    (out, true)
}

/// Lossy decode of captured process output.
pub fn decode_output(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::{truncate_utf8_prefix, truncate_with_marker};

    #[test]
    fn truncate_utf8_prefix_handles_ascii() {
        assert_eq!(truncate_utf8_prefix("hello", 3), "hel");
        assert_eq!(truncate_utf8_prefix("hello", 10), "hello");
    }

    #[test]
    fn truncate_utf8_prefix_does_not_split_utf8() {
        assert_eq!(truncate_utf8_prefix("a\u{e9}b", 2), "a");
        assert_eq!(truncate_utf8_prefix("a\u{e9}b", 3), "a\u{e9}");
    }

    #[test]
    fn truncate_with_marker_only_marks_when_cut() {
        assert_eq!(truncate_with_marker("abc", 3, "!"), ("abc".to_string(), false));
        assert_eq!(truncate_with_marker("abcd", 3, "!"), ("abc!".to_string(), true));
    }
}
