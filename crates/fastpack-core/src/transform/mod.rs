//! Transform chains.
//!
//! A module's content flows through the stages its rules selected, in
//! declaration order. Each [`Stage`] sees the previous stage's output and a
//! [`StageContext`] through which it reports dependencies, emits assets, and
//! changes the module's output kind.
//!
//! Source maps compose along the chain: a stage that returns a map is traced
//! through the map accumulated so far. A stage that returns no map is taken to
//! preserve lines, so the accumulated map stays as it is.

mod registry;
pub mod stages;

pub use registry::{ConfiguredStage, StageFactory, StageRegistry};

use crate::assets::{AssetError, AssetNamer, AssetRecord};
use crate::sourcemap::SourceMap;
use fastpack_util::fs::normalize_slashes;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// How a dependency was referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    /// `import x from "..."` or `import "..."`.
    Import,
    /// `export ... from "..."`.
    Export,
    /// `require("...")`.
    Require,
    /// `import("...")`.
    DynamicImport,
    /// CSS `@import`.
    StyleImport,
    /// CSS `url(...)`.
    Url,
}

/// What the emitter does with a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Wrapped into the script bundle.
    #[default]
    Script,
    /// Deferred into the extracted stylesheet.
    Style,
    /// A static file copied to the output directory.
    Asset,
}

/// A dependency reported by a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub specifier: String,
    pub kind: DependencyKind,
}

/// Marker for an asset reference that the emitter replaces with a public URL.
/// `index` is the position of the reference in the module's dependency list.
#[must_use]
pub fn asset_placeholder(index: usize) -> String {
    format!("__FASTPACK_ASSET_{index}__")
}

/// Prefix shared by every asset placeholder.
pub const ASSET_PLACEHOLDER_PREFIX: &str = "__FASTPACK_ASSET_";

/// Content entering a stage.
#[derive(Debug)]
pub struct StageInput<'a> {
    pub content: String,
    /// Map from `content` back to the original file, if any stage made one.
    pub map: Option<&'a SourceMap>,
}

/// Content leaving a stage.
#[derive(Debug, Default)]
pub struct StageOutput {
    pub content: String,
    /// Map from the new content to the stage's input content.
    pub map: Option<SourceMap>,
}

impl StageOutput {
    /// Output that keeps line positions.
    #[must_use]
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            map: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Asset(#[from] AssetError),
}

impl StageError {
    pub fn failed(message: impl fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}

/// Per-module state shared by the stages of one chain.
pub struct StageContext<'a> {
    path: &'a Path,
    source_name: String,
    raw: &'a [u8],
    shared: &'a Map<String, Value>,
    assets: &'a AssetNamer,
    dependencies: Vec<Dependency>,
    emitted: Vec<AssetRecord>,
    watched: Vec<PathBuf>,
    kind: OutputKind,
}

impl<'a> StageContext<'a> {
    #[must_use]
    pub fn new(
        path: &'a Path,
        raw: &'a [u8],
        shared: &'a Map<String, Value>,
        assets: &'a AssetNamer,
    ) -> Self {
        Self {
            path,
            source_name: normalize_slashes(path),
            raw,
            shared,
            assets,
            dependencies: Vec::new(),
            emitted: Vec::new(),
            watched: Vec::new(),
            kind: OutputKind::Script,
        }
    }

    /// The module being transformed.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.path
    }

    /// Name used for this module in source maps.
    #[must_use]
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// The file's bytes as read from disk.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        self.raw
    }

    #[must_use]
    pub fn shared(&self) -> &Map<String, Value> {
        self.shared
    }

    /// Report a dependency. Returns its index in the module's dependency
    /// list; reporting the same specifier twice returns the first index.
    pub fn emit_dependency(&mut self, specifier: impl Into<String>, kind: DependencyKind) -> usize {
        let specifier = specifier.into();
        if let Some(index) = self.dependencies.iter().position(|d| d.specifier == specifier) {
            return index;
        }
        self.dependencies.push(Dependency { specifier, kind });
        self.dependencies.len() - 1
    }

    #[must_use]
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Name this module's raw bytes as an asset. The name is claimed when
    /// the graph builder merges this module, not here.
    pub fn emit_asset(
        &mut self,
        template: &str,
        public_path: Option<&str>,
    ) -> Result<AssetRecord, StageError> {
        let record = self
            .assets
            .prepare(self.path, Arc::from(self.raw), template, public_path)?;
        self.emitted.push(record.clone());
        Ok(record)
    }

    /// Record a file outside the module graph that this module's output
    /// depends on, such as a Sass partial. A change to it invalidates the
    /// module's cached transform.
    pub fn watch_file(&mut self, path: &Path) {
        let path = dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if path != self.path && !self.watched.contains(&path) {
            self.watched.push(path);
        }
    }

    #[must_use]
    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }

    pub fn set_output_kind(&mut self, kind: OutputKind) {
        self.kind = kind;
    }

    #[must_use]
    pub fn output_kind(&self) -> OutputKind {
        self.kind
    }
}

/// A transform stage.
pub trait Stage: Send + Sync + fmt::Debug {
    fn transform(
        &self,
        input: StageInput<'_>,
        ctx: &mut StageContext<'_>,
    ) -> Result<StageOutput, StageError>;
}

/// Everything a chain produced for one module.
#[derive(Debug, Clone, Default)]
pub struct TransformOutcome {
    pub content: String,
    pub map: Option<SourceMap>,
    pub dependencies: Vec<Dependency>,
    pub assets: Vec<AssetRecord>,
    /// Files read by stages that are not graph nodes.
    pub watched: Vec<PathBuf>,
    pub kind: OutputKind,
}

/// A chain that stopped at a failing stage.
#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {error}")]
pub struct StageFailure {
    pub stage: String,
    #[source]
    pub error: StageError,
}

/// Run `stages` over a module in order.
///
/// The initial content is the raw bytes decoded as UTF-8 (lossily; binary
/// files only make sense to stages that read [`StageContext::raw`]).
pub fn run_stages(
    path: &Path,
    raw: &[u8],
    stages: &[ConfiguredStage],
    shared: &Map<String, Value>,
    assets: &AssetNamer,
) -> Result<TransformOutcome, StageFailure> {
    let mut ctx = StageContext::new(path, raw, shared, assets);
    let mut content = String::from_utf8_lossy(raw).into_owned();
    let mut map: Option<SourceMap> = None;

    for configured in stages {
        let input = StageInput {
            content,
            map: map.as_ref(),
        };
        let output = configured
            .stage
            .transform(input, &mut ctx)
            .map_err(|error| StageFailure {
                stage: configured.id.clone(),
                error,
            })?;
        map = match (output.map, map) {
            (Some(new), Some(prev)) => Some(new.compose(&prev)),
            (Some(new), None) => Some(new),
            (None, prev) => prev,
        };
        content = output.content;
    }

    Ok(TransformOutcome {
        content,
        map,
        dependencies: ctx.dependencies,
        assets: ctx.emitted,
        watched: ctx.watched,
        kind: ctx.kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sourcemap::Mapping;

    #[derive(Debug)]
    struct Append(&'static str);

    impl Stage for Append {
        fn transform(
            &self,
            input: StageInput<'_>,
            _ctx: &mut StageContext<'_>,
        ) -> Result<StageOutput, StageError> {
            Ok(StageOutput::content(format!("{}{}", input.content, self.0)))
        }
    }

    #[derive(Debug)]
    struct Fail;

    impl Stage for Fail {
        fn transform(
            &self,
            _input: StageInput<'_>,
            _ctx: &mut StageContext<'_>,
        ) -> Result<StageOutput, StageError> {
            Err(StageError::failed("boom"))
        }
    }

    /// Prepends one line and returns a map shifting everything down by one.
    #[derive(Debug)]
    struct PrependLine;

    impl Stage for PrependLine {
        fn transform(
            &self,
            input: StageInput<'_>,
            ctx: &mut StageContext<'_>,
        ) -> Result<StageOutput, StageError> {
            let lines = crate::sourcemap::line_count(&input.content);
            let map = SourceMap {
                sources: vec![ctx.source_name().to_string()],
                sources_content: vec![None],
                mappings: (0..lines)
                    .map(|l| Mapping {
                        gen_line: l + 1,
                        gen_col: 0,
                        source: 0,
                        src_line: l,
                        src_col: 0,
                    })
                    .collect(),
            };
            Ok(StageOutput {
                content: format!("// header\n{}", input.content),
                map: Some(map),
            })
        }
    }

    #[derive(Debug)]
    struct Deps;

    impl Stage for Deps {
        fn transform(
            &self,
            input: StageInput<'_>,
            ctx: &mut StageContext<'_>,
        ) -> Result<StageOutput, StageError> {
            ctx.emit_dependency("./a", DependencyKind::Import);
            ctx.emit_dependency("./b", DependencyKind::Require);
            ctx.emit_dependency("./a", DependencyKind::Require);
            ctx.set_output_kind(OutputKind::Style);
            Ok(StageOutput::content(input.content))
        }
    }

    fn configured(id: &str, stage: impl Stage + 'static) -> ConfiguredStage {
        ConfiguredStage {
            id: id.to_string(),
            stage: Arc::new(stage),
        }
    }

    fn run(stages: &[ConfiguredStage], raw: &str) -> Result<TransformOutcome, StageFailure> {
        let namer = AssetNamer::new("/p", "");
        run_stages(
            &PathBuf::from("/p/src/a.js"),
            raw.as_bytes(),
            stages,
            &Map::new(),
            &namer,
        )
    }

    #[test]
    fn test_stages_run_in_declaration_order() {
        let stages = [configured("one", Append("1")), configured("two", Append("2"))];
        assert_eq!(run(&stages, "x").unwrap().content, "x12");
    }

    #[test]
    fn test_empty_chain_is_identity() {
        let outcome = run(&[], "let x = 1;").unwrap();
        assert_eq!(outcome.content, "let x = 1;");
        assert!(outcome.map.is_none());
        assert_eq!(outcome.kind, OutputKind::Script);
    }

    #[test]
    fn test_failure_names_the_stage() {
        let stages = [configured("one", Append("1")), configured("bad", Fail)];
        let failure = run(&stages, "x").unwrap_err();
        assert_eq!(failure.stage, "bad");
        assert_eq!(failure.error.to_string(), "boom");
    }

    #[test]
    fn test_dependencies_are_deduplicated_in_order() {
        let outcome = run(&[configured("deps", Deps)], "").unwrap();
        let specs: Vec<&str> = outcome.dependencies.iter().map(|d| d.specifier.as_str()).collect();
        assert_eq!(specs, vec!["./a", "./b"]);
        assert_eq!(outcome.dependencies[0].kind, DependencyKind::Import);
        assert_eq!(outcome.kind, OutputKind::Style);
    }

    #[test]
    fn test_maps_compose_across_stages() {
        let stages = [
            configured("first", PrependLine),
            configured("same-lines", Append("")),
            configured("second", PrependLine),
        ];
        let outcome = run(&stages, "a\nb\n").unwrap();
        assert_eq!(outcome.content, "// header\n// header\na\nb\n");
        let map = outcome.map.unwrap();
        assert_eq!(map.sources, vec!["/p/src/a.js".to_string()]);
        // Original line 0 ends up on output line 2.
        assert_eq!(map.lookup(2, 0).unwrap().src_line, 0);
        assert_eq!(map.lookup(3, 0).unwrap().src_line, 1);
    }

    #[test]
    fn test_watched_files_are_deduplicated() {
        #[derive(Debug)]
        struct Reads;
        impl Stage for Reads {
            fn transform(
                &self,
                input: StageInput<'_>,
                ctx: &mut StageContext<'_>,
            ) -> Result<StageOutput, StageError> {
                ctx.watch_file(Path::new("/p/src/_vars.scss"));
                ctx.watch_file(Path::new("/p/src/_vars.scss"));
                ctx.watch_file(Path::new("/p/src/a.js"));
                Ok(StageOutput::content(input.content))
            }
        }
        let outcome = run(&[configured("reads", Reads)], "").unwrap();
        assert_eq!(outcome.watched, vec![PathBuf::from("/p/src/_vars.scss")]);
    }

    #[test]
    fn test_emit_asset_records_into_outcome() {
        #[derive(Debug)]
        struct File;
        impl Stage for File {
            fn transform(
                &self,
                _input: StageInput<'_>,
                ctx: &mut StageContext<'_>,
            ) -> Result<StageOutput, StageError> {
                let record = ctx.emit_asset("[name].[ext]", None)?;
                ctx.set_output_kind(OutputKind::Asset);
                Ok(StageOutput::content(record.public_url))
            }
        }
        let outcome = run(&[configured("file", File)], "bytes").unwrap();
        assert_eq!(outcome.content, "a.js");
        assert_eq!(outcome.assets.len(), 1);
        assert_eq!(outcome.kind, OutputKind::Asset);
    }
}
