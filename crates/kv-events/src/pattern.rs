//! Subscription patterns matched against a full storage path

use crate::error::Result;
use regex::Regex;

/// A subscription pattern: exact path, shell-style glob, or full regex.
pub enum Pattern {
    /// Matches only this exact path
    Exact(String),
    /// `*` matches any run of characters (including `/`), `?` matches one
    Glob(String),
    /// Arbitrary regex, matched against the whole path
    Regex(Regex),
}

impl Pattern {
    /// Build a glob pattern.
    pub fn glob(pattern: impl Into<String>) -> Self {
        Pattern::Glob(pattern.into())
    }

    /// Build a regex pattern, compiling it up front so a bad pattern fails
    /// at subscribe time rather than on every dispatch.
    pub fn regex(pattern: &str) -> Result<Self> {
        Ok(Pattern::Regex(Regex::new(pattern)?))
    }

    /// Does this pattern match `path`?
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Pattern::Exact(exact) => exact == path,
            Pattern::Glob(glob) => glob_matches(glob.as_bytes(), path.as_bytes()),
            Pattern::Regex(re) => re.is_match(path),
        }
    }
}

fn glob_matches(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (None, Some(_)) => false,
        (Some(b'*'), _) => {
            // Try consuming zero-or-more characters of text for this `*`.
            glob_matches(&pattern[1..], text)
                || (!text.is_empty() && glob_matches(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_matches(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => glob_matches(&pattern[1..], &text[1..]),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_matches_only_identical_path() {
        let p = Pattern::Exact("all/notes/1".into());
        assert!(p.matches("all/notes/1"));
        assert!(!p.matches("all/notes/2"));
    }

    #[test]
    fn glob_star_matches_across_separators() {
        let p = Pattern::glob("all/notes/*");
        assert!(p.matches("all/notes/1"));
        assert!(p.matches("all/notes/1/2/3"));
        assert!(!p.matches("all/other/1"));
    }

    #[test]
    fn glob_question_mark_matches_single_char() {
        let p = Pattern::glob("all/notes/?");
        assert!(p.matches("all/notes/1"));
        assert!(!p.matches("all/notes/12"));
    }

    #[test]
    fn regex_matches_whole_path() {
        let p = Pattern::regex(r"^all/notes/\d+$").unwrap();
        assert!(p.matches("all/notes/42"));
        assert!(!p.matches("all/notes/abc"));
    }

    #[test]
    fn invalid_regex_is_rejected_at_construction() {
        assert!(Pattern::regex("(unclosed").is_err());
    }
}
