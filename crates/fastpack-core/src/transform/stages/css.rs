//! CSS processing using lightningcss.
//!
//! Parses and reprints the stylesheet (optionally minified) and turns its
//! references into graph dependencies:
//!
//! - `@import` rules become [`DependencyKind::StyleImport`] dependencies and
//!   are removed from the output; the emitter orders the imported sheet first.
//! - Relative `url()` targets become [`DependencyKind::Url`] dependencies and
//!   are rewritten to asset placeholders resolved at emission time.
//!
//! Absolute URLs, data URIs and fragment references are left alone.

use crate::transform::registry::parse_options;
use crate::transform::{
    asset_placeholder, DependencyKind, Stage, StageContext, StageError, StageInput, StageOutput,
};
use lightningcss::dependencies::{Dependency, DependencyOptions};
use lightningcss::printer::PrinterOptions;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, StyleSheet};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

pub const ID: &str = "css";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CssOptions {
    /// Defaults to the shared `minify` flag.
    #[serde(default)]
    minify: Option<bool>,
    /// Treat `url()` targets as dependencies.
    #[serde(default = "default_true")]
    url: bool,
    /// Bundle `@import`ed sheets.
    #[serde(default = "default_true")]
    import: bool,
}

impl Default for CssOptions {
    fn default() -> Self {
        Self {
            minify: None,
            url: true,
            import: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug)]
pub struct CssStage {
    minify: bool,
    url: bool,
    import: bool,
}

impl Stage for CssStage {
    fn transform(
        &self,
        input: StageInput<'_>,
        ctx: &mut StageContext<'_>,
    ) -> Result<StageOutput, StageError> {
        let filename = ctx.source_name().to_string();
        let mut stylesheet = StyleSheet::parse(
            &input.content,
            ParserOptions {
                filename: filename.clone(),
                ..Default::default()
            },
        )
        .map_err(|e| StageError::failed(format!("parse error in {filename}: {e}")))?;

        if self.minify {
            stylesheet
                .minify(MinifyOptions::default())
                .map_err(|e| StageError::failed(format!("minify error: {e}")))?;
        }

        let output = stylesheet
            .to_css(PrinterOptions {
                minify: self.minify,
                analyze_dependencies: Some(DependencyOptions {
                    remove_imports: self.import,
                }),
                ..Default::default()
            })
            .map_err(|e| StageError::failed(format!("print error: {e}")))?;

        let mut code = output.code;
        for dependency in output.dependencies.unwrap_or_default() {
            match dependency {
                Dependency::Import(import) => {
                    if self.import {
                        if let Some(specifier) = module_request(&import.url) {
                            ctx.emit_dependency(specifier, DependencyKind::StyleImport);
                        }
                    } else {
                        code = code.replace(&import.placeholder, &import.url);
                    }
                }
                Dependency::Url(url) => {
                    let replacement = match module_request(&url.url) {
                        Some(specifier) if self.url => {
                            let index = ctx.emit_dependency(specifier, DependencyKind::Url);
                            asset_placeholder(index)
                        }
                        _ => url.url.clone(),
                    };
                    code = code.replace(&url.placeholder, &replacement);
                }
            }
        }

        Ok(StageOutput::content(code))
    }
}

/// The module specifier for a CSS reference, or `None` when the reference
/// is not a bundled file (absolute URL, data URI, root path, fragment).
///
/// `~pkg/file` names a module; bare `file.png` means `./file.png`.
fn module_request(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty()
        || url.starts_with('#')
        || url.starts_with('/')
        || url.starts_with("data:")
        || url.contains("://")
        || url.starts_with("//")
    {
        return None;
    }
    if let Some(module) = url.strip_prefix('~') {
        return Some(module.to_string());
    }
    if url.starts_with("./") || url.starts_with("../") {
        return Some(url.to_string());
    }
    Some(format!("./{url}"))
}

pub fn create(options: &Value, shared: &Map<String, Value>) -> Result<Arc<dyn Stage>, String> {
    let options: CssOptions = parse_options(options)?;
    let shared_minify = shared.get("minify").and_then(Value::as_bool).unwrap_or(false);
    Ok(Arc::new(CssStage {
        minify: options.minify.unwrap_or(shared_minify),
        url: options.url,
        import: options.import,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::stages::test_support::run_one;
    use serde_json::json;

    #[test]
    fn test_basic_css_processing() {
        let outcome = run_one("css", Value::Null, "/p/a.css", ".foo { color: red; }").unwrap();
        assert!(outcome.content.contains("color"));
        assert!(outcome.dependencies.is_empty());
    }

    #[test]
    fn test_minification() {
        let css = ".foo {\n  color: red;\n  margin: 10px;\n}";
        let outcome = run_one("css", json!({ "minify": true }), "/p/a.css", css).unwrap();
        assert!(!outcome.content.contains('\n'));
    }

    #[test]
    fn test_imports_become_dependencies_and_are_removed() {
        let css = "@import \"./base.css\";\n.a { color: blue; }";
        let outcome = run_one("css", Value::Null, "/p/a.css", css).unwrap();
        assert!(!outcome.content.contains("@import"));
        assert_eq!(outcome.dependencies.len(), 1);
        assert_eq!(outcome.dependencies[0].specifier, "./base.css");
        assert_eq!(outcome.dependencies[0].kind, DependencyKind::StyleImport);
    }

    #[test]
    fn test_imports_kept_when_disabled() {
        let css = "@import \"./base.css\";\n.a { color: blue; }";
        let outcome = run_one("css", json!({ "import": false }), "/p/a.css", css).unwrap();
        assert!(outcome.content.contains("@import"));
        assert!(outcome.content.contains("./base.css"));
        assert!(outcome.dependencies.is_empty());
    }

    #[test]
    fn test_relative_urls_become_placeholders() {
        let css = ".a { background: url(img/bg.png); }\n.b { background: url(\"https://x.test/y.png\"); }";
        let outcome = run_one("css", Value::Null, "/p/a.css", css).unwrap();
        assert_eq!(outcome.dependencies.len(), 1);
        assert_eq!(outcome.dependencies[0].specifier, "./img/bg.png");
        assert_eq!(outcome.dependencies[0].kind, DependencyKind::Url);
        assert!(outcome.content.contains(&asset_placeholder(0)));
        assert!(outcome.content.contains("https://x.test/y.png"));
    }

    #[test]
    fn test_parse_error_fails_stage() {
        let err = run_one("css", Value::Null, "/p/a.css", "..a {}").unwrap_err();
        assert!(err.contains("stage `css` failed"), "{err}");
    }

    #[test]
    fn test_module_request() {
        assert_eq!(module_request("a.png").as_deref(), Some("./a.png"));
        assert_eq!(module_request("../a.png").as_deref(), Some("../a.png"));
        assert_eq!(module_request("~font-awesome/fonts/fa.woff").as_deref(), Some("font-awesome/fonts/fa.woff"));
        assert_eq!(module_request("data:image/png;base64,AAAA"), None);
        assert_eq!(module_request("/abs.png"), None);
        assert_eq!(module_request("#icon"), None);
        assert_eq!(module_request("https://cdn/x.png"), None);
    }
}
