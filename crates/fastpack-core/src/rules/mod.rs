//! Rule matching.
//!
//! Maps a module path to the ordered list of stages that transform it.
//!
//! ## Matching
//!
//! Paths are normalized to forward slashes, then tested against each rule's
//! `test` regex in declaration order. A rule with an exclusion predicate
//! skips paths the predicate excludes. Which matching rules contribute is
//! decided by the [`MatchPolicy`].
//!
//! An empty result means "bundle the file unmodified".

mod predicate;

pub use predicate::ExcludePredicate;

use crate::config::{ExcludeConfig, RuleConfig};
use crate::error::ConfigError;
use crate::transform::{ConfiguredStage, StageRegistry};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// How several rules matching the same path combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPolicy {
    /// Stop at the first matching rule that is not marked `additive`.
    #[default]
    FirstMatch,
    /// Every matching rule contributes, in declaration order.
    All,
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Position in the config, for diagnostics.
    pub index: usize,
    pub test: Regex,
    pub exclude: Option<ExcludePredicate>,
    pub stages: Vec<ConfiguredStage>,
    pub additive: bool,
}

impl Rule {
    /// Whether this rule applies to a normalized path.
    #[must_use]
    pub fn applies_to(&self, path: &str) -> bool {
        self.test.is_match(path) && !self.exclude.as_ref().is_some_and(|e| e.excludes(path))
    }
}

/// Why a rule did or did not apply to a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleVerdict {
    NoMatch,
    Excluded,
    /// The exclusion pattern hit, but only inside an override scope.
    Overridden,
    Matched,
    /// Matched, but an earlier non-additive rule already won.
    Shadowed,
}

/// Per-rule explanation returned by [`RuleSet::explain`].
#[derive(Debug, Clone, Serialize)]
pub struct RuleExplanation {
    pub index: usize,
    pub test: String,
    pub verdict: RuleVerdict,
    pub stages: Vec<String>,
}

/// An ordered, compiled rule list.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    policy: MatchPolicy,
}

impl RuleSet {
    #[must_use]
    pub fn new(rules: Vec<Rule>, policy: MatchPolicy) -> Self {
        Self { rules, policy }
    }

    /// Compile configured rules, instantiating every stage through the
    /// registry. All configuration errors surface here, before any build.
    pub fn compile(
        configs: &[RuleConfig],
        policy: MatchPolicy,
        registry: &StageRegistry,
        shared: &Map<String, Value>,
    ) -> Result<Self, ConfigError> {
        let mut rules = Vec::with_capacity(configs.len());

        for (index, config) in configs.iter().enumerate() {
            let test = compile_pattern(index, &config.test)?;
            let exclude = match &config.exclude {
                None => None,
                Some(ExcludeConfig::Pattern(pattern)) => {
                    Some(ExcludePredicate::Exclude(compile_pattern(index, pattern)?))
                }
                Some(ExcludeConfig::Scoped { pattern, except }) => {
                    Some(ExcludePredicate::ExcludeExceptPrefix {
                        pattern: compile_pattern(index, pattern)?,
                        prefixes: except.clone(),
                    })
                }
            };

            let uses = config.stages.as_slice();
            if uses.is_empty() {
                return Err(ConfigError::EmptyStages { rule: index });
            }
            let stages = uses
                .iter()
                .map(|u| registry.instantiate(index, u.id(), u.options(), shared))
                .collect::<Result<Vec<_>, _>>()?;

            rules.push(Rule {
                index,
                test,
                exclude,
                stages,
                additive: config.additive,
            });
        }

        Ok(Self { rules, policy })
    }

    #[must_use]
    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Stages for `path`, in execution order.
    #[must_use]
    pub fn match_path(&self, path: &Path) -> Vec<ConfiguredStage> {
        self.match_str(&fastpack_util::fs::normalize_slashes(path))
    }

    /// Stages for an already-normalized path.
    #[must_use]
    pub fn match_str(&self, path: &str) -> Vec<ConfiguredStage> {
        let mut stages = Vec::new();
        for rule in &self.rules {
            if !rule.applies_to(path) {
                continue;
            }
            stages.extend(rule.stages.iter().cloned());
            if self.policy == MatchPolicy::FirstMatch && !rule.additive {
                break;
            }
        }
        stages
    }

    /// Whether any rule applies to `path`.
    #[must_use]
    pub fn has_match(&self, path: &Path) -> bool {
        let path = fastpack_util::fs::normalize_slashes(path);
        self.rules.iter().any(|r| r.applies_to(&path))
    }

    /// All `test` patterns, for error messages.
    #[must_use]
    pub fn patterns(&self) -> String {
        let patterns: Vec<&str> = self.rules.iter().map(|r| r.test.as_str()).collect();
        if patterns.is_empty() {
            "<none>".to_string()
        } else {
            patterns.join(", ")
        }
    }

    /// Explain every rule's verdict for `path`.
    #[must_use]
    pub fn explain(&self, path: &Path) -> Vec<RuleExplanation> {
        let path = fastpack_util::fs::normalize_slashes(path);
        let mut won = false;

        self.rules
            .iter()
            .map(|rule| {
                let verdict = if !rule.test.is_match(&path) {
                    RuleVerdict::NoMatch
                } else {
                    match &rule.exclude {
                        Some(exclude) if exclude.excludes(&path) => RuleVerdict::Excluded,
                        Some(exclude) if exclude.hits(&path) => RuleVerdict::Overridden,
                        _ => RuleVerdict::Matched,
                    }
                };
                let verdict = match verdict {
                    RuleVerdict::Matched | RuleVerdict::Overridden if won => RuleVerdict::Shadowed,
                    v => {
                        if matches!(v, RuleVerdict::Matched | RuleVerdict::Overridden)
                            && self.policy == MatchPolicy::FirstMatch
                            && !rule.additive
                        {
                            won = true;
                        }
                        v
                    }
                };
                RuleExplanation {
                    index: rule.index,
                    test: rule.test.as_str().to_string(),
                    verdict,
                    stages: rule.stages.iter().map(|s| s.id.clone()).collect(),
                }
            })
            .collect()
    }
}

fn compile_pattern(rule: usize, pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
        rule,
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StageList, StageUse};

    fn rule(test: &str, exclude: Option<ExcludeConfig>, stages: &[&str]) -> RuleConfig {
        RuleConfig {
            test: test.to_string(),
            exclude,
            stages: StageList::Many(stages.iter().map(|s| StageUse::Id((*s).to_string())).collect()),
            additive: false,
        }
    }

    fn compile(rules: &[RuleConfig], policy: MatchPolicy) -> RuleSet {
        RuleSet::compile(rules, policy, &StageRegistry::with_builtins(), &Map::new()).unwrap()
    }

    fn ids(stages: &[ConfiguredStage]) -> Vec<&str> {
        stages.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn test_single_rule_returns_stages_in_order() {
        let set = compile(
            &[rule(r"\.sass$", None, &["sass", "css", "extract-style"])],
            MatchPolicy::FirstMatch,
        );
        let stages = set.match_path(Path::new("/p/src/main.sass"));
        assert_eq!(ids(&stages), vec!["sass", "css", "extract-style"]);
    }

    #[test]
    fn test_no_match_is_empty() {
        let set = compile(&[rule(r"\.css$", None, &["css"])], MatchPolicy::FirstMatch);
        assert!(set.match_path(Path::new("/p/app.js")).is_empty());
    }

    #[test]
    fn test_plain_exclusion() {
        let set = compile(
            &[rule(
                r"\.js$",
                Some(ExcludeConfig::Pattern("node_modules/".to_string())),
                &["script"],
            )],
            MatchPolicy::FirstMatch,
        );
        assert!(set.match_path(Path::new("/p/node_modules/lodash/index.js")).is_empty());
        assert_eq!(ids(&set.match_path(Path::new("/p/src/app.js"))), vec!["script"]);
    }

    #[test]
    fn test_override_beats_exclusion() {
        let set = compile(
            &[rule(
                r"\.js$",
                Some(ExcludeConfig::Scoped {
                    pattern: r"node_modules[\\/]".to_string(),
                    except: vec!["fable-".to_string()],
                }),
                &["script"],
            )],
            MatchPolicy::FirstMatch,
        );
        assert_eq!(
            ids(&set.match_path(Path::new("/p/node_modules/fable-core/Util.js"))),
            vec!["script"]
        );
        assert!(set.match_path(Path::new("/p/node_modules/react/index.js")).is_empty());
        assert_eq!(ids(&set.match_path(Path::new("/p/src/app.js"))), vec!["script"]);
    }

    #[test]
    fn test_backslash_paths_are_normalized() {
        let set = compile(
            &[rule(
                r"\.js$",
                Some(ExcludeConfig::Pattern("node_modules/".to_string())),
                &["script"],
            )],
            MatchPolicy::FirstMatch,
        );
        assert!(set.match_str("C:/p/node_modules/x.js").is_empty());
        assert!(set
            .match_path(Path::new("C:\\p\\node_modules\\x.js"))
            .is_empty());
    }

    #[test]
    fn test_first_match_policy() {
        let rules = [
            rule(r"\.css$", None, &["css"]),
            rule(r"\.(css|sass)$", None, &["extract-style"]),
        ];
        let first = compile(&rules, MatchPolicy::FirstMatch);
        assert_eq!(ids(&first.match_path(Path::new("/a.css"))), vec!["css"]);

        let all = compile(&rules, MatchPolicy::All);
        assert_eq!(
            ids(&all.match_path(Path::new("/a.css"))),
            vec!["css", "extract-style"]
        );
    }

    #[test]
    fn test_additive_rule_composes_under_first_match() {
        let mut lint = rule(r"\.js$", None, &["passthrough"]);
        lint.additive = true;
        let rules = [lint, rule(r"\.js$", None, &["script"]), rule(r".*", None, &["css"])];
        let set = compile(&rules, MatchPolicy::FirstMatch);
        assert_eq!(
            ids(&set.match_path(Path::new("/a.js"))),
            vec!["passthrough", "script"]
        );
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let err = RuleSet::compile(
            &[rule(r"\.(js$", None, &["script"])],
            MatchPolicy::FirstMatch,
            &StageRegistry::with_builtins(),
            &Map::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { rule: 0, .. }));
    }

    #[test]
    fn test_unknown_stage_is_config_error() {
        let err = RuleSet::compile(
            &[rule(r"\.fs$", None, &["fable-loader"])],
            MatchPolicy::FirstMatch,
            &StageRegistry::with_builtins(),
            &Map::new(),
        )
        .unwrap_err();
        match err {
            ConfigError::UnknownStage { stage, known, .. } => {
                assert_eq!(stage, "fable-loader");
                assert!(known.contains("script"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_stage_list_is_config_error() {
        let err = RuleSet::compile(
            &[rule(r"\.js$", None, &[])],
            MatchPolicy::FirstMatch,
            &StageRegistry::with_builtins(),
            &Map::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyStages { rule: 0 }));
    }

    #[test]
    fn test_explain_reports_verdicts() {
        let rules = [
            rule(
                r"\.js$",
                Some(ExcludeConfig::Scoped {
                    pattern: "node_modules/".to_string(),
                    except: vec!["fable-".to_string()],
                }),
                &["script"],
            ),
            rule(r"\.js$", None, &["passthrough"]),
            rule(r"\.css$", None, &["css"]),
        ];
        let set = compile(&rules, MatchPolicy::FirstMatch);

        let verdicts: Vec<RuleVerdict> = set
            .explain(Path::new("/p/node_modules/fable-core/a.js"))
            .into_iter()
            .map(|e| e.verdict)
            .collect();
        assert_eq!(
            verdicts,
            vec![RuleVerdict::Overridden, RuleVerdict::Shadowed, RuleVerdict::NoMatch]
        );

        let verdicts: Vec<RuleVerdict> = set
            .explain(Path::new("/p/node_modules/react/a.js"))
            .into_iter()
            .map(|e| e.verdict)
            .collect();
        assert_eq!(
            verdicts,
            vec![RuleVerdict::Excluded, RuleVerdict::Matched, RuleVerdict::NoMatch]
        );
    }
}
