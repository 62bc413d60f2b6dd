//! Wildcard domain matching
//!
//! Content-blocker rules express domain conditions (`if-domain`,
//! `unless-domain`) as wildcard patterns like `*example.com`. Allow-list
//! suppression in the tracker database needs the same patterns as regular
//! expressions. Both conversions are memoized process-wide: they run on every
//! allow-list mutation and on every classification.

use std::collections::HashMap;
use std::sync::RwLock;

use regex::Regex;

static WILDCARD_MEMO: RwLock<Option<HashMap<String, String>>> = RwLock::new(None);

static REGEX_MEMO: RwLock<Option<HashMap<String, Option<Regex>>>> = RwLock::new(None);

/// Convert a wildcard domain into an anchored regex string.
///
/// `*example.com` becomes `^(.*\.)?example\.com$`, matching the domain itself
/// and any subdomain. Without the leading `*` only the exact domain matches.
pub fn wildcard_to_regex(domain: &str) -> String {
    if let Ok(memo) = WILDCARD_MEMO.read() {
        if let Some(regex) = memo.as_ref().and_then(|m| m.get(domain)) {
            return regex.clone();
        }
    }

    let regex = convert(domain);

    if let Ok(mut memo) = WILDCARD_MEMO.write() {
        memo.get_or_insert_with(HashMap::new)
            .insert(domain.to_string(), regex.clone());
    }

    regex
}

fn convert(domain: &str) -> String {
    let (prefix, rest) = match domain.strip_prefix('*') {
        Some(rest) => (r"^(.*\.)?", rest.trim_start_matches('.')),
        None => ("^", domain),
    };
    format!("{}{}$", prefix, regex::escape(rest))
}

/// Compiled form of a regex pattern, memoized.
///
/// Invalid patterns are cached as misses so they are only reported once.
pub fn compiled_regex(pattern: &str) -> Option<Regex> {
    if let Ok(memo) = REGEX_MEMO.read() {
        if let Some(entry) = memo.as_ref().and_then(|m| m.get(pattern)) {
            return entry.clone();
        }
    }

    let compiled = match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            log::warn!("ignoring invalid domain pattern '{}': {}", pattern, e);
            None
        }
    };

    if let Ok(mut memo) = REGEX_MEMO.write() {
        memo.get_or_insert_with(HashMap::new)
            .insert(pattern.to_string(), compiled.clone());
    }

    compiled
}

/// True if any of the regex patterns finds a match in `text`.
pub fn matches_any<S: AsRef<str>>(patterns: &[S], text: &str) -> bool {
    patterns
        .iter()
        .filter_map(|p| compiled_regex(p.as_ref()))
        .any(|regex| regex.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_to_regex_shape() {
        assert_eq!(wildcard_to_regex("*example.com"), r"^(.*\.)?example\.com$");
        assert_eq!(wildcard_to_regex("example.com"), r"^example\.com$");
        assert_eq!(wildcard_to_regex("*.example.com"), r"^(.*\.)?example\.com$");
    }

    #[test]
    fn test_wildcard_matches_subdomains_only() {
        let pattern = [wildcard_to_regex("*example.com")];
        assert!(matches_any(&pattern, "sub.example.com"));
        assert!(matches_any(&pattern, "a.b.example.com"));
        assert!(matches_any(&pattern, "example.com"));
        assert!(!matches_any(&pattern, "notexample.com"));
        assert!(!matches_any(&pattern, "example.com.evil.net"));
    }

    #[test]
    fn test_exact_pattern() {
        let pattern = [wildcard_to_regex("example.com")];
        assert!(matches_any(&pattern, "example.com"));
        assert!(!matches_any(&pattern, "sub.example.com"));
    }

    #[test]
    fn test_ipv6_literal_pattern() {
        let pattern = [wildcard_to_regex("*[2001:db8::1]")];
        assert!(matches_any(&pattern, "[2001:db8::1]"));
        assert!(!matches_any(&pattern, "[2001:db8::2]"));
        assert!(!matches_any(&pattern, "2"));
    }

    #[test]
    fn test_memoized_results_are_stable() {
        let first = wildcard_to_regex("*memo.test");
        let second = wildcard_to_regex("*memo.test");
        assert_eq!(first, second);
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        assert!(compiled_regex("(unclosed").is_none());
        assert!(!matches_any(&["(unclosed"], "anything"));
        let empty: [&str; 0] = [];
        assert!(!matches_any(&empty, "example.com"));
    }
}
