//! Small text helpers shared across the engine.

/// Truncate to at most `max_chars` characters without splitting a
/// code point. Returns the input unchanged when it is short enough.
///
/// Counts characters rather than bytes; prompts built from Chinese
/// transcripts would otherwise panic on a mid-character byte index.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_passes_through() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 5), "hello");
    }

    #[test]
    fn long_input_is_cut_at_char_count() {
        assert_eq!(truncate_chars("hello world", 5), "hello");
    }

    #[test]
    fn multibyte_input_counts_chars_not_bytes() {
        // Four three-byte characters.
        assert_eq!(truncate_chars("月亮升起", 2), "月亮");
        assert_eq!(truncate_chars("月亮升起", 4), "月亮升起");
        assert_eq!(truncate_chars("月亮升起", 100), "月亮升起");
    }

    #[test]
    fn zero_yields_empty() {
        assert_eq!(truncate_chars("月亮", 0), "");
        assert_eq!(truncate_chars("", 0), "");
    }
}
