//! Cleanup of PDF-extraction artifacts before pattern matching.
//!
//! PDF text converters glue words across line breaks, leave null bytes and
//! empty bracket pairs behind, and scatter reference-pointer boilerplate
//! around identifiers. [`clean_text`] rewrites those artifacts without ever
//! removing characters that could belong to an identifier (digits, dashes,
//! slashes, alphanumerics). [`clean_url`] strips trailing punctuation that
//! sentence context attaches to captured URLs; applying it twice equals
//! applying it once.

use std::sync::LazyLock;

use regex::Regex;

use super::patterns::compile_static_regex;

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| compile_static_regex(r"\s+"));

static EMPTY_BRACKETS: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"\(\s*\)|\[\s*\]|\{\s*\}"));

/// Boilerplate phrases that precede identifiers in reference sections.
/// Removing them improves token boundaries around the identifier itself.
static REFERENCE_POINTERS: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r"(?i)\b(?:available (?:at|from|online at)|accessible (?:at|from)|deposited (?:at|in|under)|can be (?:found|accessed) at)[:\s]*",
    )
});

/// Glued lowercase-to-capital boundary: only split when the lowercase
/// prefix is at least 4 letters, so short identifiers like `scPSM` survive.
static GLUED_WORDS: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"([a-z]{4,})([A-Z][a-z])"));

/// Letter-to-number boundary: only split before runs of 4+ digits, so
/// short alphanumeric identifiers like `1ABC` or `GSE5` stay intact.
static GLUED_NUMBERS: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"([a-z]{4,})(\d{4,})"));

/// Rewrites known PDF-extraction artifacts in the input text.
///
/// Performed rewrites, in order:
/// 1. Null bytes dropped.
/// 2. Reference-pointer phrases removed.
/// 3. Empty bracket pairs `()`, `[]`, `{}` removed.
/// 4. Glued word and number boundaries split (conservatively).
/// 5. Whitespace runs collapsed to a single space.
#[must_use]
#[tracing::instrument(skip(text), fields(text_len = text.len()))]
pub fn clean_text(text: &str) -> String {
    let without_nul: String = text.chars().filter(|&c| c != '\0').collect();
    let without_pointers = REFERENCE_POINTERS.replace_all(&without_nul, " ");
    let without_brackets = EMPTY_BRACKETS.replace_all(&without_pointers, " ");
    let split_words = GLUED_WORDS.replace_all(&without_brackets, "$1 $2");
    let split_numbers = GLUED_NUMBERS.replace_all(&split_words, "$1 $2");
    WHITESPACE_RUN
        .replace_all(&split_numbers, " ")
        .trim()
        .to_string()
}

/// Strips trailing punctuation that sentence context attaches to URLs.
///
/// Trailing `.`, `,`, `;`, `:`, `!`, `?` are removed unless the dot starts
/// a plausible file extension. Closing brackets are removed only while
/// unbalanced with respect to the URL itself.
#[must_use]
pub fn clean_url(url: &str) -> String {
    let mut result = url.trim();

    loop {
        let Some(last) = result.chars().last() else {
            break;
        };
        match last {
            ',' | ';' | ':' | '!' | '?' => {
                result = &result[..result.len() - last.len_utf8()];
            }
            '.' => {
                // Keep the dot when it introduces a short file extension.
                if looks_like_extension(result) {
                    break;
                }
                result = &result[..result.len() - 1];
            }
            ')' | ']' | '}' => {
                let (open, close) = match last {
                    ')' => ('(', ')'),
                    ']' => ('[', ']'),
                    _ => ('{', '}'),
                };
                let opens = result.chars().filter(|&c| c == open).count();
                let closes = result.chars().filter(|&c| c == close).count();
                if closes > opens {
                    result = &result[..result.len() - 1];
                } else {
                    break;
                }
            }
            _ => break,
        }
    }

    result.to_string()
}

/// True when the final dot-separated segment looks like a file extension
/// (1-5 alphanumeric characters).
fn looks_like_extension(url: &str) -> bool {
    url.rfind('.').is_some_and(|dot| {
        let after = &url[dot + 1..];
        !after.is_empty() && after.len() <= 5 && after.chars().all(|c| c.is_ascii_alphanumeric())
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== clean_text Tests ====================

    #[test]
    fn test_clean_text_collapses_whitespace() {
        assert_eq!(clean_text("a  b\t\tc\n\nd"), "a b c d");
    }

    #[test]
    fn test_clean_text_drops_null_bytes() {
        assert_eq!(clean_text("GSE\012345"), "GSE12345");
    }

    #[test]
    fn test_clean_text_removes_empty_brackets() {
        assert_eq!(clean_text("data () here [] and {}"), "data here and");
    }

    #[test]
    fn test_clean_text_removes_reference_pointers() {
        let cleaned = clean_text("Data available at https://example.com/d.csv");
        assert_eq!(cleaned, "Data https://example.com/d.csv");
    }

    #[test]
    fn test_clean_text_splits_glued_words() {
        assert_eq!(clean_text("datasetAvailable"), "dataset Available");
    }

    #[test]
    fn test_clean_text_preserves_short_identifiers() {
        // Prefix under 4 letters stays glued.
        assert_eq!(clean_text("scPSM"), "scPSM");
        assert_eq!(clean_text("1ABC"), "1ABC");
    }

    #[test]
    fn test_clean_text_preserves_accessions() {
        // Uppercase prefixes never trigger the glued-word split.
        assert_eq!(clean_text("GSE123456"), "GSE123456");
        assert_eq!(clean_text("SRR9876543"), "SRR9876543");
    }

    #[test]
    fn test_clean_text_splits_long_glued_numbers() {
        assert_eq!(clean_text("figure20210315"), "figure 20210315");
    }

    #[test]
    fn test_clean_text_keeps_identifier_characters() {
        let input = "10.1038/s41467-021-23778-6";
        assert_eq!(clean_text(input), input);
    }

    // ==================== clean_url Tests ====================

    #[test]
    fn test_clean_url_strips_trailing_period() {
        assert_eq!(clean_url("https://example.com/page."), "https://example.com/page");
    }

    #[test]
    fn test_clean_url_keeps_file_extension() {
        assert_eq!(
            clean_url("https://example.com/data.csv"),
            "https://example.com/data.csv"
        );
    }

    #[test]
    fn test_clean_url_strips_trailing_comma_and_semicolon() {
        assert_eq!(clean_url("https://example.com/x,;"), "https://example.com/x");
    }

    #[test]
    fn test_clean_url_strips_unbalanced_paren() {
        assert_eq!(clean_url("https://example.com/x)"), "https://example.com/x");
    }

    #[test]
    fn test_clean_url_keeps_balanced_parens() {
        assert_eq!(
            clean_url("https://example.com/a(1)"),
            "https://example.com/a(1)"
        );
    }

    #[test]
    fn test_clean_url_idempotent() {
        let once = clean_url("https://example.com/page.],;");
        let twice = clean_url(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_clean_url_empty_input() {
        assert_eq!(clean_url(""), "");
    }
}
