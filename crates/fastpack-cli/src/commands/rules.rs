//! `fastpack rules <path>`: show how the rule list treats one file.

use super::config_failure;
use crate::load_config;
use fastpack_core::rules::{RuleExplanation, RuleVerdict};
use fastpack_core::version::SCHEMA_VERSION;
use fastpack_core::Compiler;
use fastpack_util::fs::normalize_slashes;
use miette::Result;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct RulesJson<'a> {
    schema_version: u32,
    ok: bool,
    path: String,
    /// Stage ids that will run, in order.
    stages: Vec<String>,
    pass_through: bool,
    rules: &'a [RuleExplanation],
}

pub fn run(cwd: &Path, config_path: Option<&Path>, path: &Path, json: bool) -> Result<()> {
    let config = load_config(cwd, config_path).unwrap_or_else(|e| config_failure(&e, json));
    let compiler = Compiler::new(config).unwrap_or_else(|e| config_failure(&e, json));

    let target = cwd.join(path);
    let target = dunce::canonicalize(&target).unwrap_or(target);
    let rules = compiler.rules();
    let explanation = rules.explain(&target);
    let stages: Vec<String> = rules.match_path(&target).into_iter().map(|s| s.id).collect();
    let pass_through = stages.is_empty() && compiler.config().is_pass_through(&target);

    if json {
        let result = RulesJson {
            schema_version: SCHEMA_VERSION,
            ok: !stages.is_empty() || pass_through,
            path: normalize_slashes(&target),
            stages,
            pass_through,
            rules: &explanation,
        };
        println!("{}", serde_json::to_string(&result).unwrap_or_default());
        return Ok(());
    }

    println!("{}", normalize_slashes(&target));
    for rule in &explanation {
        let verdict = match rule.verdict {
            RuleVerdict::NoMatch => "no match",
            RuleVerdict::Excluded => "excluded",
            RuleVerdict::Overridden => "matched (exclusion overridden)",
            RuleVerdict::Matched => "matched",
            RuleVerdict::Shadowed => "shadowed by an earlier rule",
        };
        println!("  #{} {}  {}  [{}]", rule.index, rule.test, verdict, rule.stages.join(", "));
    }
    if !stages.is_empty() {
        println!("stages: {}", stages.join(" -> "));
    } else if pass_through {
        println!("stages: none (pass-through)");
    } else {
        println!("stages: none; building this file is a configuration error");
    }
    Ok(())
}
