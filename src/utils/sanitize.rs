use std::sync::LazyLock;

use regex::Regex;

/// Script and style elements, dropped together with their content.
static RE_CODE_BLOCK: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>|<style\b[^>]*>.*?</style\s*>").ok()
});

static RE_COMMENT: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").ok());

/// An opening, closing or declaration tag. A bare `<` followed by a space or digit is text.
static RE_TAG: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z!?][^<>]*>").ok());

/// Strips markup from free-text input and trims surrounding whitespace. Output is still
/// escaped at render time.
pub fn clean_text(input: &str) -> String {
    let mut text = input.to_string();
    for pattern in [&RE_CODE_BLOCK, &RE_COMMENT, &RE_TAG] {
        if let Some(regex) = &**pattern {
            text = regex.replace_all(&text, "").into_owned();
        }
    }
    text.trim().to_string()
}

/// Truncates to at most `max_chars` characters.
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_script_and_style_blocks() {
        assert_eq!(
            clean_text("<script>alert(1)</script>Jane Doe"),
            "Jane Doe"
        );
        assert_eq!(
            clean_text("Room <STYLE type=\"text/css\">p{}</style>12"),
            "Room 12"
        );
    }

    #[test]
    fn keeps_comparisons() {
        assert_eq!(clean_text("grade < 5 and > 2"), "grade < 5 and > 2");
        assert_eq!(clean_text("1<2"), "1<2");
    }

    #[test]
    fn strips_comments_and_attributes() {
        assert_eq!(
            clean_text("  <b class=\"x\">Room</b> 12<!-- <i>hi</i> -->  "),
            "Room 12"
        );
    }

    #[test]
    fn unclosed_tag_stays_text() {
        assert_eq!(clean_text("a <b"), "a <b");
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("Zoë Smith", 3), "Zoë");
    }
}
