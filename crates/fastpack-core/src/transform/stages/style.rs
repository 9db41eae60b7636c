//! Style delivery stages.
//!
//! `style-inject` turns CSS into a script module that appends a `<style>`
//! element when required. `extract-style` instead defers the CSS to the
//! entry group's extracted stylesheet.

use super::{collapsed_map, js_string};
use crate::transform::registry::parse_options;
use crate::transform::{
    DependencyKind, OutputKind, Stage, StageContext, StageError, StageInput, StageOutput,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt::Write;
use std::sync::Arc;

pub const INJECT_ID: &str = "style-inject";
pub const EXTRACT_ID: &str = "extract-style";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct InjectOptions {
    /// Extra attributes set on the `<style>` element.
    #[serde(default)]
    attributes: std::collections::BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct StyleInject {
    attributes: Vec<(String, String)>,
}

impl Stage for StyleInject {
    fn transform(
        &self,
        input: StageInput<'_>,
        ctx: &mut StageContext<'_>,
    ) -> Result<StageOutput, StageError> {
        let mut js = String::new();
        // Imported sheets inject first.
        for dep in ctx.dependencies() {
            if dep.kind == DependencyKind::StyleImport {
                let _ = writeln!(js, "require({});", js_string(&dep.specifier));
            }
        }
        let _ = writeln!(js, "var css = {};", js_string(&input.content));
        js.push_str("if (typeof document !== \"undefined\") {\n");
        js.push_str("  var style = document.createElement(\"style\");\n");
        let _ = writeln!(
            js,
            "  style.setAttribute(\"data-fastpack\", {});",
            js_string(ctx.source_name())
        );
        for (name, value) in &self.attributes {
            let _ = writeln!(
                js,
                "  style.setAttribute({}, {});",
                js_string(name),
                js_string(value)
            );
        }
        js.push_str("  style.textContent = css;\n");
        js.push_str("  document.head.appendChild(style);\n");
        js.push_str("}\n");
        js.push_str("module.exports = css;\n");

        ctx.set_output_kind(OutputKind::Script);
        let map = collapsed_map(ctx.source_name(), &js);
        Ok(StageOutput {
            content: js,
            map: Some(map),
        })
    }
}

#[derive(Debug)]
pub struct ExtractStyle;

impl Stage for ExtractStyle {
    fn transform(
        &self,
        input: StageInput<'_>,
        ctx: &mut StageContext<'_>,
    ) -> Result<StageOutput, StageError> {
        ctx.set_output_kind(OutputKind::Style);
        Ok(StageOutput::content(input.content))
    }
}

pub fn create_inject(options: &Value, _shared: &Map<String, Value>) -> Result<Arc<dyn Stage>, String> {
    let options: InjectOptions = parse_options(options)?;
    Ok(Arc::new(StyleInject {
        attributes: options.attributes.into_iter().collect(),
    }))
}

pub fn create_extract(options: &Value, _shared: &Map<String, Value>) -> Result<Arc<dyn Stage>, String> {
    if !options.is_null() && options.as_object().is_some_and(|o| !o.is_empty()) {
        return Err("extract-style takes no options".to_string());
    }
    Ok(Arc::new(ExtractStyle))
}
