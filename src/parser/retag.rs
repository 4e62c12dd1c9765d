//! Ordered find/replace rules that fold high-cardinality tag values (IDs,
//! UUIDs in URL paths) into a bounded set before they reach the sinks.

use regex::Regex;
use thiserror::Error;

/// Tag scope for the request URL path.
pub const TAG_HTTP_URL: &str = "http_url";

#[derive(Error, Debug)]
pub enum RetagError {
    #[error("invalid retag rule {0:?}: missing `=>` separator")]
    MissingSeparator(String),
    #[error("invalid retag pattern {pattern:?}: {source}")]
    BadPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// One compiled find/replace rule, scoped to a named tag.
///
/// Rules are built once at configuration time and immutable afterwards, so a
/// shared slice of them can be applied from any task.
#[derive(Debug, Clone)]
pub struct TagRule {
    name: String,
    regex: Regex,
    replacement: String,
}

impl TagRule {
    /// Build a rule from its parts, trimming whitespace on every side.
    /// An empty name or pattern yields no rule rather than an error.
    pub fn new(name: &str, pattern: &str, replacement: &str) -> Result<Option<Self>, RetagError> {
        let name = name.trim();
        let pattern = pattern.trim();
        if name.is_empty() || pattern.is_empty() {
            return Ok(None);
        }

        let regex = Regex::new(pattern).map_err(|source| RetagError::BadPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        Ok(Some(Self {
            name: name.to_string(),
            regex,
            replacement: replacement.trim().to_string(),
        }))
    }

    /// Parse a `pattern => replacement` rule string for the given scope.
    pub fn parse(name: &str, rule: &str) -> Result<Option<Self>, RetagError> {
        let (pattern, replacement) = rule
            .split_once("=>")
            .ok_or_else(|| RetagError::MissingSeparator(rule.to_string()))?;
        Self::new(name, pattern, replacement)
    }

    /// Replace all non-overlapping matches in `value` when `scope` matches
    /// this rule's name; a different scope passes the value through.
    pub fn apply(&self, scope: &str, value: &str) -> String {
        if self.name != scope {
            return value.to_string();
        }
        self.regex
            .replace_all(value, self.replacement.as_str())
            .into_owned()
    }
}

/// Run `value` through every rule in configured order under `scope`.
pub fn apply_rules(rules: &[TagRule], scope: &str, value: &str) -> String {
    let mut out = value.to_string();
    for rule in rules {
        out = rule.apply(scope, &out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_rules() -> Vec<TagRule> {
        [
            r"/[0-9]+-\w+-\w+-\w+-\w+-\w+ => /-",
            r"/-?\w+-\w+-\w+-\w+-\w+ => /-",
            r"/[0-9]+ => /-",
        ]
        .iter()
        .map(|raw| TagRule::parse(TAG_HTTP_URL, raw).unwrap().unwrap())
        .collect()
    }

    #[test]
    fn empty_name_or_pattern_yields_no_rule() {
        assert!(TagRule::new("", "/[0-9]+", "/-").unwrap().is_none());
        assert!(TagRule::new("http_url", "  ", "/-").unwrap().is_none());
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let err = TagRule::new("http_url", r"/[a-z", "/-").unwrap_err();
        assert!(matches!(err, RetagError::BadPattern { .. }));
    }

    #[test]
    fn rule_string_without_separator_is_an_error() {
        let err = TagRule::parse("http_url", "/[0-9]+ /-").unwrap_err();
        assert!(matches!(err, RetagError::MissingSeparator(_)));
    }

    #[test]
    fn rule_string_sides_are_trimmed() {
        let rule = TagRule::parse("http_url", "  /[0-9]+  =>  /-  ")
            .unwrap()
            .unwrap();
        assert_eq!(rule.apply("http_url", "/test/1000"), "/test/-");
    }

    #[test]
    fn different_scope_is_a_no_op() {
        let rules = id_rules();
        assert_eq!(apply_rules(&rules, "tag", "/test/1000"), "/test/1000");
    }

    #[test]
    fn single_replacement() {
        let rules = id_rules();
        assert_eq!(apply_rules(&rules, TAG_HTTP_URL, "/test/1000"), "/test/-");
    }

    #[test]
    fn numeric_and_uuid_segments_collapse() {
        let rules = id_rules();
        assert_eq!(
            apply_rules(
                &rules,
                TAG_HTTP_URL,
                "/test/1000/param/9845a0b4-f4c3-4600-af13-45b5b0e61630",
            ),
            "/test/-/param/-",
        );
        assert_eq!(
            apply_rules(
                &rules,
                TAG_HTTP_URL,
                "/group/9845a0b4-f4c3-4600-af13-45b5b0e61630/test/1000/param/1-9845a0b4-f4c3-4600-af13-45b5b0e61630",
            ),
            "/group/-/test/-/param/-",
        );
    }

    #[test]
    fn malformed_uuid_segments_still_collapse() {
        let rules = id_rules();
        assert_eq!(
            apply_rules(
                &rules,
                TAG_HTTP_URL,
                "/v1/threads/900001-fefcd79-0b03-4794-ae90-abe4b51dec75/count-previous/90001",
            ),
            "/v1/threads/-/count-previous/-",
        );
        assert_eq!(
            apply_rules(
                &rules,
                TAG_HTTP_URL,
                "/v1/threads/-fefcd79-0b03-4794-ae90-abe4b51dec75/count-previous/90001",
            ),
            "/v1/threads/-/count-previous/-",
        );
    }

    #[test]
    fn application_is_idempotent_once_nothing_matches() {
        let rules = id_rules();
        let once = apply_rules(&rules, TAG_HTTP_URL, "/test/1000/param/42");
        let twice = apply_rules(&rules, TAG_HTTP_URL, &once);
        assert_eq!(once, twice);
    }
}
