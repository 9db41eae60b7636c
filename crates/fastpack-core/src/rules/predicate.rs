//! Exclusion predicates.

use regex_lite::Regex;

/// Removes paths from a rule that would otherwise match.
#[derive(Debug, Clone)]
pub enum ExcludePredicate {
    /// Exclude every path the pattern matches.
    Exclude(Regex),
    /// Exclude paths the pattern matches, except where the text right after
    /// the match starts with one of `prefixes`.
    ///
    /// `node_modules/` excepting `fable-` keeps `node_modules/fable-core/x.js`
    /// and drops `node_modules/react/x.js`. A path is excluded as soon as a
    /// single match falls outside every override scope.
    ExcludeExceptPrefix {
        pattern: Regex,
        prefixes: Vec<String>,
    },
}

impl ExcludePredicate {
    /// Whether `path` is excluded.
    #[must_use]
    pub fn excludes(&self, path: &str) -> bool {
        match self {
            Self::Exclude(pattern) => pattern.is_match(path),
            Self::ExcludeExceptPrefix { pattern, prefixes } => pattern
                .find_iter(path)
                .any(|m| !prefixes.iter().any(|p| path[m.end()..].starts_with(p.as_str()))),
        }
    }

    /// Whether the exclusion pattern matches at all, overridden or not.
    #[must_use]
    pub fn hits(&self, path: &str) -> bool {
        match self {
            Self::Exclude(pattern) | Self::ExcludeExceptPrefix { pattern, .. } => {
                pattern.is_match(path)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scoped(pattern: &str, prefixes: &[&str]) -> ExcludePredicate {
        ExcludePredicate::ExcludeExceptPrefix {
            pattern: Regex::new(pattern).unwrap(),
            prefixes: prefixes.iter().map(|p| (*p).to_string()).collect(),
        }
    }

    #[test]
    fn test_plain_exclude() {
        let p = ExcludePredicate::Exclude(Regex::new("node_modules").unwrap());
        assert!(p.excludes("/a/node_modules/b.js"));
        assert!(!p.excludes("/a/src/b.js"));
    }

    #[test]
    fn test_override_scope_keeps_path() {
        let p = scoped(r"node_modules[\\/]", &["fable-"]);
        assert!(!p.excludes("/a/node_modules/fable-core/Seq.js"));
        assert!(p.hits("/a/node_modules/fable-core/Seq.js"));
    }

    #[test]
    fn test_outside_override_scope_is_excluded() {
        let p = scoped(r"node_modules[\\/]", &["fable-"]);
        assert!(p.excludes("/a/node_modules/react/index.js"));
    }

    #[test]
    fn test_any_unscoped_match_excludes() {
        let p = scoped(r"node_modules/", &["fable-"]);
        assert!(p.excludes("/a/node_modules/fable-core/node_modules/left-pad/i.js"));
    }

    #[test]
    fn test_multiple_prefixes() {
        let p = scoped(r"vendor/", &["ours-", "@scope/"]);
        assert!(!p.excludes("/v/vendor/ours-lib/a.js"));
        assert!(!p.excludes("/v/vendor/@scope/a.js"));
        assert!(p.excludes("/v/vendor/theirs/a.js"));
    }

    #[test]
    fn test_no_hit_means_not_excluded() {
        let p = scoped(r"node_modules/", &["fable-"]);
        assert!(!p.excludes("/a/src/app.js"));
        assert!(!p.hits("/a/src/app.js"));
    }
}
