//! Context window tokenization
//!
//! Upstream detectors must populate each span's `window` before spans enter
//! the pipeline. These helpers produce that window from the source text the
//! same way for every caller: word tokens (`[A-Za-z0-9_]+`), ordered, taken
//! from both sides of the span.

/// A word token with its byte range in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Split text into word tokens with byte positions.
///
/// Non-word, non-whitespace bytes are skipped; multi-byte characters are
/// treated as token boundaries.
pub fn tokenize(text: &str) -> Vec<Token> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        if is_word_byte(bytes[i]) {
            let start = i;
            i += 1;
            while i < bytes.len() && is_word_byte(bytes[i]) {
                i += 1;
            }
            out.push(Token {
                text: text[start..i].to_string(),
                start,
                end: i,
            });
            continue;
        }
        i += 1;
    }

    out
}

/// Extract up to `radius` tokens on each side of the `[start, end)` range,
/// in document order.
pub fn tokenize_window(text: &str, start: usize, end: usize, radius: usize) -> Vec<String> {
    let tokens = tokenize(text);

    let before: Vec<&Token> = tokens.iter().filter(|t| t.end <= start).collect();
    let after: Vec<&Token> = tokens.iter().filter(|t| t.start >= end).collect();

    let mut window = Vec::with_capacity(radius * 2);
    let skip = before.len().saturating_sub(radius);
    for t in before.into_iter().skip(skip) {
        window.push(t.text.clone());
    }
    for t in after.into_iter().take(radius) {
        window.push(t.text.clone());
    }

    window
}

/// Canonical cache key for a context window: lowercased tokens joined by a
/// single space.
pub fn normalize_window(window: &[String]) -> String {
    window
        .iter()
        .map(|t| t.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_words_and_positions() {
        let tokens = tokenize("Patient SSN: 123-45-6789");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["Patient", "SSN", "123", "45", "6789"]);
        assert_eq!(tokens[0].start, 0);
        assert_eq!(tokens[0].end, 7);
    }

    #[test]
    fn test_tokenize_empty() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("  ...  ").is_empty());
    }

    #[test]
    fn test_window_both_sides() {
        let text = "The patient ssn is 123-45-6789 on file today";
        // Span covers "123-45-6789"
        let start = text.find("123").unwrap();
        let end = start + "123-45-6789".len();
        let window = tokenize_window(text, start, end, 3);
        assert_eq!(window, vec!["patient", "ssn", "is", "on", "file", "today"]);
    }

    #[test]
    fn test_window_radius_limits() {
        let text = "a b c d e TARGET f g h i j";
        let start = text.find("TARGET").unwrap();
        let end = start + "TARGET".len();
        let window = tokenize_window(text, start, end, 2);
        assert_eq!(window, vec!["d", "e", "f", "g"]);
    }

    #[test]
    fn test_normalize_window() {
        let window = vec!["Patient".to_string(), "SSN".to_string(), "Is".to_string()];
        assert_eq!(normalize_window(&window), "patient ssn is");
    }
}
