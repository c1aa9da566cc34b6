use std::fmt;
use std::ops::Range;

use regex::bytes::Regex;

/// Marker in an engine's output that means "ready for the next command".
///
/// Both forms are matched against raw output bytes, so a prompt split across
/// read chunks or preceded by non-UTF-8 output is still found. A `Literal`
/// prompt is matched exactly; a `Pattern` is a `regex` crate expression.
/// Empty matches never count as a prompt.
#[derive(Clone)]
pub enum Prompt {
    Literal(String),
    Pattern(Regex),
}

impl Prompt {
    pub fn literal(text: &str) -> Self {
        Prompt::Literal(text.to_string())
    }

    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Prompt::Pattern)
    }

    /// Byte range of the first prompt occurrence in `haystack`.
    pub fn find(&self, haystack: &[u8]) -> Option<Range<usize>> {
        match self {
            Prompt::Literal(text) => {
                let needle = text.as_bytes();
                if needle.is_empty() || needle.len() > haystack.len() {
                    return None;
                }
                haystack
                    .windows(needle.len())
                    .position(|w| w == needle)
                    .map(|start| start..start + needle.len())
            }
            Prompt::Pattern(regex) => regex
                .find_iter(haystack)
                .find(|m| !m.is_empty())
                .map(|m| m.range()),
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Prompt::Literal(_))
    }
}

impl fmt::Debug for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prompt::Literal(s) => write!(f, "Prompt::literal({:?})", s),
            Prompt::Pattern(r) => write!(f, "Prompt::pattern({:?})", r.as_str()),
        }
    }
}

impl PartialEq for Prompt {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Prompt::Literal(a), Prompt::Literal(b)) => a == b,
            (Prompt::Pattern(a), Prompt::Pattern(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_is_not_a_pattern() {
        let p = Prompt::literal("> ");
        assert!(p.is_literal());
        assert_eq!(p.find(b"output\n> "), Some(7..9));

        let dollar = Prompt::literal("$ ");
        assert_eq!(dollar.find(b"x\n$ "), Some(2..4));
        assert_eq!(Prompt::literal("a.b").find(b"axb"), None);
        assert_eq!(Prompt::literal("").find(b"abc"), None);
    }

    #[test]
    fn pattern_prompt() {
        let p = Prompt::pattern(r"\[\d+\]> ").unwrap();
        assert!(!p.is_literal());
        assert_eq!(p.find(b"ok\n[12]> "), Some(3..9));
        assert!(Prompt::pattern("(").is_err());
    }

    #[test]
    fn empty_matches_are_ignored() {
        let p = Prompt::pattern("x*").unwrap();
        assert_eq!(p.find(b"abc"), None);
        assert_eq!(p.find(b"abxx"), Some(2..4));
    }
}
