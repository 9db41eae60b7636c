//! Script dependency scanning.
//!
//! Leaves content untouched and reports every static import, re-export,
//! `require()` and `import()` specifier as a dependency. Also runs implicitly
//! for pass-through files that no rule matched.

use crate::imports::scan_imports;
use crate::transform::registry::parse_options;
use crate::transform::{Stage, StageContext, StageError, StageInput, StageOutput};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

pub const ID: &str = "script";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScriptOptions {
    /// Skip `import()` targets, leaving them to the runtime.
    #[serde(default)]
    ignore_dynamic: bool,
}

#[derive(Debug, Default)]
pub struct ScriptStage {
    ignore_dynamic: bool,
}

impl Stage for ScriptStage {
    fn transform(
        &self,
        input: StageInput<'_>,
        ctx: &mut StageContext<'_>,
    ) -> Result<StageOutput, StageError> {
        for import in scan_imports(&input.content) {
            if self.ignore_dynamic && import.kind == crate::transform::DependencyKind::DynamicImport {
                continue;
            }
            ctx.emit_dependency(import.specifier, import.kind);
        }
        Ok(StageOutput::content(input.content))
    }
}

pub fn create(options: &Value, _shared: &Map<String, Value>) -> Result<Arc<dyn Stage>, String> {
    let options: ScriptOptions = parse_options(options)?;
    Ok(Arc::new(ScriptStage {
        ignore_dynamic: options.ignore_dynamic,
    }))
}

#[cfg(test)]
mod tests {
    use crate::transform::stages::test_support::run_one;
    use crate::transform::DependencyKind;
    use serde_json::{json, Value};

    const SOURCE: &str = r#"import a from "./a";
const b = require("./b");
import("./lazy");
"#;

    #[test]
    fn test_reports_dependencies_unchanged_content() {
        let outcome = run_one("script", Value::Null, "/p/src/main.js", SOURCE).unwrap();
        assert_eq!(outcome.content, SOURCE);
        let deps: Vec<(&str, DependencyKind)> = outcome
            .dependencies
            .iter()
            .map(|d| (d.specifier.as_str(), d.kind))
            .collect();
        assert_eq!(
            deps,
            vec![
                ("./a", DependencyKind::Import),
                ("./b", DependencyKind::Require),
                ("./lazy", DependencyKind::DynamicImport),
            ]
        );
    }

    #[test]
    fn test_ignore_dynamic() {
        let outcome =
            run_one("script", json!({ "ignore_dynamic": true }), "/p/src/main.js", SOURCE).unwrap();
        assert_eq!(outcome.dependencies.len(), 2);
    }
}
