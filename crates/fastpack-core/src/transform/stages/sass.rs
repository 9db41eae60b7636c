//! Sass/SCSS compilation using grass.
//!
//! `.sass` files use the indented syntax; everything else is parsed as SCSS.
//! `@use`/`@import` are resolved by grass against the file's directory and
//! the configured include paths, so partials are inlined rather than added
//! to the module graph. Every file grass reads is reported through
//! [`StageContext::watch_file`] so that editing a partial rebuilds the
//! stylesheets that use it.

use crate::transform::registry::parse_options;
use crate::transform::{Stage, StageContext, StageError, StageInput, StageOutput};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const ID: &str = "sass";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SassOptions {
    /// Extra directories for `@use`/`@import` resolution.
    #[serde(default)]
    include_paths: Vec<PathBuf>,
    /// Compressed output. Defaults to the shared `minify` flag.
    #[serde(default)]
    minify: Option<bool>,
}

/// The real filesystem, remembering which files grass loaded.
#[derive(Debug, Default)]
struct RecordingFs {
    loaded: RefCell<Vec<PathBuf>>,
}

impl grass::Fs for RecordingFs {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        self.loaded.borrow_mut().push(path.to_path_buf());
        std::fs::read(path)
    }
}

#[derive(Debug)]
pub struct SassStage {
    include_paths: Vec<PathBuf>,
    minify: bool,
}

impl Stage for SassStage {
    fn transform(
        &self,
        input: StageInput<'_>,
        ctx: &mut StageContext<'_>,
    ) -> Result<StageOutput, StageError> {
        let indented = ctx
            .path()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("sass"));

        let fs = RecordingFs::default();
        let mut options = grass::Options::default()
            .fs(&fs)
            .style(if self.minify {
                grass::OutputStyle::Compressed
            } else {
                grass::OutputStyle::Expanded
            })
            .input_syntax(if indented {
                grass::InputSyntax::Sass
            } else {
                grass::InputSyntax::Scss
            });
        if let Some(parent) = ctx.path().parent() {
            options = options.load_path(parent);
        }
        for path in &self.include_paths {
            options = options.load_path(path);
        }

        let compiled = grass::from_string(input.content, &options);
        for path in fs.loaded.borrow().iter() {
            ctx.watch_file(path);
        }
        let css = compiled.map_err(|e| StageError::failed(format!("sass compile error: {e}")))?;
        Ok(StageOutput::content(css))
    }
}

pub fn create(options: &Value, shared: &Map<String, Value>) -> Result<Arc<dyn Stage>, String> {
    let options: SassOptions = parse_options(options)?;
    let shared_minify = shared.get("minify").and_then(Value::as_bool).unwrap_or(false);
    Ok(Arc::new(SassStage {
        include_paths: options.include_paths,
        minify: options.minify.unwrap_or(shared_minify),
    }))
}
