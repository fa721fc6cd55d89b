//! Character-level text helpers shared by the stores and the composer.
//!
//! Lengths are counted in `char`s, not bytes: most traffic is CJK text.

/// Suffix appended to any text cut by [`truncate_chars`].
pub const ELLIPSIS: &str = "...";

/// Keep at most `max` characters, appending [`ELLIPSIS`] when anything was cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => format!("{}{ELLIPSIS}", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// Collapse every run of whitespace (newlines included) into one space and
/// trim both ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_chars("hello", 5), "hello");
        assert_eq!(truncate_chars("", 0), "");
    }

    #[test]
    fn long_text_is_cut_with_ellipsis() {
        assert_eq!(truncate_chars("hello world", 5), "hello...");
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("你好世界", 2), "你好...");
    }

    #[test]
    fn truncating_a_truncated_text_is_stable() {
        let once = truncate_chars("abcdefgh", 4);
        assert_eq!(truncate_chars(&once, 4), once);
    }

    #[test]
    fn whitespace_runs_collapse() {
        assert_eq!(
            collapse_whitespace("  apples\n\n are \t red \r\n"),
            "apples are red"
        );
        assert_eq!(collapse_whitespace(" \n\t "), "");
    }
}
