//! Ignore patterns for mirroring and watching.
//!
//! Patterns come from `[sync].ignore_patterns` and take two forms:
//! `*<suffix>` matches any path component ending in `<suffix>` (so
//! `*.tar.gz` works), anything else matches a component by exact name.
//! Matching is done on paths relative to the source root so that the
//! location of the root itself never causes a match. A match on a directory
//! component excludes everything below it.

use std::ffi::OsStr;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    Suffix(String),
    Name(String),
}

impl Pattern {
    fn parse(raw: &str) -> Self {
        match raw.strip_prefix('*') {
            Some(suffix) => Pattern::Suffix(suffix.to_string()),
            None => Pattern::Name(raw.to_string()),
        }
    }

    fn matches(&self, name: &OsStr) -> bool {
        let name = name.to_string_lossy();
        match self {
            Pattern::Suffix(suffix) => name.ends_with(suffix.as_str()),
            Pattern::Name(exact) => name == exact.as_str(),
        }
    }
}

/// Ignore pattern matcher
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    patterns: Vec<Pattern>,
}

impl IgnoreMatcher {
    /// Matcher that ignores nothing
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_patterns(patterns: &[String]) -> Self {
        Self {
            patterns: patterns.iter().map(|p| Pattern::parse(p)).collect(),
        }
    }

    /// Check if a root-relative path should be ignored
    pub fn should_ignore(&self, relative: &Path) -> bool {
        relative.components().any(|component| {
            let name = component.as_os_str();
            self.patterns.iter().any(|p| p.matches(name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_ignore_component() {
        let matcher = IgnoreMatcher::with_patterns(&[".git".to_string()]);
        assert!(matcher.should_ignore(&PathBuf::from(".git/config")));
        assert!(matcher.should_ignore(&PathBuf::from("nested/.git")));
        assert!(!matcher.should_ignore(&PathBuf::from("src/git.rs")));
        assert!(!matcher.should_ignore(&PathBuf::from("src/.gitignore")));
    }

    #[test]
    fn test_ignore_suffix() {
        let matcher = IgnoreMatcher::with_patterns(&["*.swp".to_string()]);
        assert!(matcher.should_ignore(&PathBuf::from("notes/.todo.swp")));
        assert!(!matcher.should_ignore(&PathBuf::from("notes/todo.txt")));
        assert!(!matcher.should_ignore(&PathBuf::from("notes/todo.swpx")));
    }

    #[test]
    fn test_multi_dot_suffix() {
        let matcher = IgnoreMatcher::with_patterns(&["*.tar.gz".to_string()]);
        assert!(matcher.should_ignore(&PathBuf::from("dist/release.tar.gz")));
        assert!(!matcher.should_ignore(&PathBuf::from("dist/release.gz")));
    }

    #[test]
    fn test_suffix_on_directory_covers_contents() {
        let matcher = IgnoreMatcher::with_patterns(&["*.tmp".to_string()]);
        assert!(matcher.should_ignore(&PathBuf::from("build.tmp/out/main.o")));
    }

    #[test]
    fn test_empty_matcher() {
        let matcher = IgnoreMatcher::new();
        assert!(!matcher.should_ignore(&PathBuf::from("anything")));
    }
}
