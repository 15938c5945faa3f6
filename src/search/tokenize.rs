/// Text normalization for the lexical index.
///
/// Lowercase, strip punctuation (hyphens survive), split on whitespace, drop short
/// terms, then apply one light suffix rule. Deterministic and stateless: the same
/// text always yields the same terms.

use regex::Regex;
use std::sync::OnceLock;

/// Terms of this many characters or fewer are discarded.
const MIN_TERM_CHARS: usize = 2;

fn punctuation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w\s-]").expect("static regex"))
}

/// Lowercase and replace every character that is not a word character, whitespace or
/// hyphen with a space.
pub fn normalize(text: &str) -> String {
    punctuation_re().replace_all(&text.to_lowercase(), " ").into_owned()
}

/// Tokenize text into index terms.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text)
        .split_whitespace()
        .filter(|term| term.chars().count() > MIN_TERM_CHARS)
        .map(stem)
        .collect()
}

/// Strip at most one suffix. First matching rule wins, no chaining.
fn stem(term: &str) -> String {
    let len = term.chars().count();

    let strip = if term.ends_with("ing") {
        3
    } else if term.ends_with("tion") {
        4
    } else if term.ends_with("ly") {
        2
    } else if term.ends_with("ed") && len > 4 {
        2
    } else if term.ends_with('s') && len > 3 {
        1
    } else {
        0
    };

    // Suffixes are ASCII, so the byte offset is exact.
    term[..term.len() - strip].to_string()
}
