//! Bundle emission.
//!
//! Turns a finished [`ModuleGraph`] into output artifacts:
//!
//! - one script bundle per entry group: a small module registry runtime with
//!   every reachable module wrapped in a function, in dependency-first order;
//! - one extracted stylesheet per entry group that has style-deferred modules;
//! - a V3 source map for each bundle (separate file or inline);
//! - every named static asset.
//!
//! Emission is a pure function of the graph and the asset table: running it
//! twice on the same inputs yields byte-identical artifacts.

use crate::assets::AssetRecord;
use crate::config::{expand_name, Config, Devtool};
use crate::error::{codes, BuildReport, Diagnostic};
use crate::graph::{module_id, EntryGroupNodes, ModuleGraph, ModuleNode};
use crate::sourcemap::{line_count, SourceMap, SourceMapBuilder};
use crate::transform::{DependencyKind, OutputKind, ASSET_PLACEHOLDER_PREFIX};
use base64::Engine as _;
use fastpack_util::fs::{atomic_write, normalize_slashes, remove_stale_files};
use regex_lite::{Captures, Regex};
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Scheme prefix for source names in emitted maps.
pub const SOURCE_URL_PREFIX: &str = "fastpack:///";

const RUNTIME_PRELUDE: &str = r#"(function (modules, entries) {
  var cache = {};
  function load(id) {
    var cached = cache[id];
    if (cached) return cached.exports;
    var module = cache[id] = { exports: {} };
    var def = modules[id];
    def[0].call(module.exports, module, module.exports, function (specifier) {
      var target = def[1][specifier];
      if (target === undefined) throw new Error("Cannot find module '" + specifier + "'");
      return load(target);
    });
    return module.exports;
  }
  for (var i = 0; i < entries.length; i++) load(entries[i]);
})([
"#;

/// A file produced by a build, relative to the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub contents: Arc<[u8]>,
}

impl Artifact {
    fn new(path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            contents: Arc::from(contents.into()),
        }
    }
}

/// What was emitted for one entry group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleSummary {
    pub name: String,
    pub script: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    pub modules: usize,
}

/// Result of [`emit`].
#[derive(Debug, Default)]
pub struct EmitOutput {
    pub artifacts: Vec<Artifact>,
    pub bundles: Vec<BundleSummary>,
    /// Emission diagnostics. Groups skipped because of earlier diagnostics
    /// add nothing here.
    pub report: BuildReport,
}

/// Emit every entry group whose reachable modules built cleanly.
#[must_use]
pub fn emit(config: &Config, graph: &ModuleGraph, assets: &[AssetRecord]) -> EmitOutput {
    let mut out = EmitOutput::default();
    let mut claimed: HashMap<String, Owner> = HashMap::default();
    let emitter = Emitter { config, graph };

    // Assets claim first: bundles reference them by URL, so a bundle that
    // would overwrite one is the artifact to drop.
    for record in assets {
        let owner = Owner::Asset(module_id(&record.original));
        match claim(&mut claimed, &record.output_name, owner) {
            Ok(()) => out
                .artifacts
                .push(Artifact::new(&record.output_name, record.contents.to_vec())),
            Err(d) => out.report.push(d),
        }
    }

    for group in graph.groups() {
        if !group.missing.is_empty() || graph.has_errors_reachable(&group.entries) {
            debug!(group = %group.name, "skipping entry group with errors");
            continue;
        }
        let order = graph.emission_order(&group.entries);

        let owner = Owner::Group(group.name.clone());
        let script_name = expand_name(&config.output.filename, &group.name);
        if let Err(d) = emitter.claim_bundle(&mut claimed, &script_name, &owner) {
            out.report.push(d);
            continue;
        }
        let (script, script_map) = emitter.script_bundle(group, &order);
        out.artifacts
            .extend(emitter.finish(&script_name, script, script_map, Comment::Line));

        let styles: Vec<&ModuleNode> = order
            .iter()
            .copied()
            .filter(|n| n.kind == OutputKind::Style)
            .collect();
        let mut style_name = None;
        if !styles.is_empty() {
            let name = expand_name(&config.output.style_filename, &group.name);
            if let Some(cycle) = style_cycle(graph, &styles) {
                out.report.push(Diagnostic::emission(
                    codes::STYLE_CYCLE,
                    &cycle,
                    &name,
                    "style imports form a cycle; the stylesheet was not emitted",
                ));
            } else if let Err(d) = emitter.claim_bundle(&mut claimed, &name, &owner) {
                out.report.push(d);
            } else {
                let (css, map) = emitter.style_bundle(&styles);
                out.artifacts.extend(emitter.finish(&name, css, map, Comment::Block));
                style_name = Some(name);
            }
        }

        out.bundles.push(BundleSummary {
            name: group.name.clone(),
            script: script_name,
            style: style_name,
            modules: order.len(),
        });
    }

    out.artifacts.sort_by(|a, b| a.path.cmp(&b.path));
    out.report.normalize();
    out
}

/// Who writes an output file.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Owner {
    Group(String),
    /// Module id of the asset's original file.
    Asset(String),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group(name) => write!(f, "entry group `{name}`"),
            Self::Asset(id) => write!(f, "asset {id}"),
        }
    }
}

/// Fail if someone other than `owner` already writes `name`. Output files
/// share one namespace: bundles, maps and assets may not overwrite each other.
fn check_free(claimed: &HashMap<String, Owner>, name: &str, owner: &Owner) -> Result<(), Diagnostic> {
    match claimed.get(name) {
        Some(existing) if existing != owner => {
            let (path, context) = match owner {
                Owner::Group(group) => (name.to_string(), group.clone()),
                Owner::Asset(id) => (id.clone(), name.to_string()),
            };
            Err(Diagnostic::emission(
                codes::ASSET_NAME_COLLISION,
                &path,
                &context,
                format!("`{name}` is written by both {existing} and {owner}; add [name] or [hash] to the template"),
            ))
        }
        _ => Ok(()),
    }
}

/// Record that `owner` writes `name`.
fn claim(claimed: &mut HashMap<String, Owner>, name: &str, owner: Owner) -> Result<(), Diagnostic> {
    check_free(claimed, name, &owner)?;
    claimed.insert(name.to_string(), owner);
    Ok(())
}

#[derive(Clone, Copy)]
enum Comment {
    Line,
    Block,
}

struct Emitter<'a> {
    config: &'a Config,
    graph: &'a ModuleGraph,
}

impl Emitter<'_> {
    /// Claim a bundle and, with external maps, its `.map` file.
    fn claim_bundle(
        &self,
        claimed: &mut HashMap<String, Owner>,
        name: &str,
        owner: &Owner,
    ) -> Result<(), Diagnostic> {
        let mut names = vec![name.to_string()];
        if self.config.devtool == Devtool::SourceMap {
            names.push(format!("{name}.map"));
        }
        for name in &names {
            check_free(claimed, name, owner)?;
        }
        for name in names {
            claimed.insert(name, owner.clone());
        }
        Ok(())
    }

    /// Source name for a module: its path relative to the project root.
    fn display_name(&self, node: &ModuleNode) -> String {
        node.path
            .strip_prefix(&self.config.root)
            .map_or_else(|_| node.id.clone(), normalize_slashes)
    }

    fn script_bundle(&self, group: &EntryGroupNodes, order: &[&ModuleNode]) -> (String, SourceMap) {
        let index: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.as_str(), i))
            .collect();

        let mut out = String::from(RUNTIME_PRELUDE);
        let mut line = line_count(RUNTIME_PRELUDE);
        let mut maps = SourceMapBuilder::new();

        for (i, node) in order.iter().enumerate() {
            let deps: BTreeMap<&str, usize> = node
                .dependencies
                .iter()
                .filter_map(|d| {
                    let target = self.graph.target(d)?;
                    Some((d.specifier.as_str(), *index.get(target.id.as_str())?))
                })
                .collect();
            let deps_json = serde_json::to_string(&deps).unwrap_or_else(|_| "{}".to_string());

            let _ = writeln!(
                out,
                "/* {i}: {} */ [function (module, exports, require) {{",
                self.display_name(node)
            );
            line += 1;

            if node.kind != OutputKind::Style {
                let body = self.substitute_assets(node);
                self.map_module(&mut maps, node, line);
                out.push_str(&body);
                if !body.is_empty() && !body.ends_with('\n') {
                    out.push('\n');
                }
                line += line_count(&body);
            }

            let _ = writeln!(out, "}}, {deps_json}],");
            line += 1;
        }

        let entries: Vec<usize> = group
            .entries
            .iter()
            .filter_map(|id| index.get(id.as_str()).copied())
            .collect();
        let _ = writeln!(
            out,
            "], {});",
            serde_json::to_string(&entries).unwrap_or_else(|_| "[]".to_string())
        );
        (out, maps.finish())
    }

    fn style_bundle(&self, styles: &[&ModuleNode]) -> (String, SourceMap) {
        let mut out = String::new();
        let mut line = 0;
        let mut maps = SourceMapBuilder::new();
        for node in styles {
            let body = self.substitute_assets(node);
            self.map_module(&mut maps, node, line);
            out.push_str(&body);
            if !body.ends_with('\n') {
                out.push('\n');
            }
            line += line_count(&body).max(1);
        }
        (out, maps.finish())
    }

    /// Append `node`'s map to the bundle map with its content starting at
    /// `line`. Modules without a map get an identity line map.
    fn map_module(&self, maps: &mut SourceMapBuilder, node: &ModuleNode, line: u32) {
        if node.kind == OutputKind::Asset {
            return;
        }
        let name = format!("{SOURCE_URL_PREFIX}{}", self.display_name(node));
        match &node.map {
            Some(map) => {
                let mut map = map.clone();
                for (i, source) in map.sources.iter_mut().enumerate() {
                    if *source == node.id {
                        *source = name.clone();
                        if let Some(slot) = map.sources_content.get_mut(i) {
                            if slot.is_none() {
                                slot.clone_from(&node.source);
                            }
                        }
                    }
                }
                maps.append(&map, line, 0);
            }
            None => {
                if let Some(source) = &node.source {
                    maps.append(&SourceMap::identity(&name, source), line, 0);
                }
            }
        }
    }

    /// Replace asset placeholders with the public URL of the asset each
    /// dependency resolved to.
    fn substitute_assets(&self, node: &ModuleNode) -> String {
        if !node.content.contains(ASSET_PLACEHOLDER_PREFIX) {
            return node.content.clone();
        }
        placeholder_regex()
            .replace_all(&node.content, |caps: &Captures<'_>| {
                let url = caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| node.dependencies.get(i))
                    .and_then(|dep| {
                        let target = self.graph.target(dep)?;
                        match target.assets.first() {
                            Some(record) => Some(record.public_url.clone()),
                            None => {
                                warn!(module = %node.id, specifier = %dep.specifier, "url() target is not an asset");
                                Some(dep.specifier.clone())
                            }
                        }
                    });
                url.unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Attach the source map per the devtool setting.
    fn finish(&self, name: &str, mut code: String, map: SourceMap, comment: Comment) -> Vec<Artifact> {
        let file = Path::new(name)
            .file_name()
            .map_or_else(|| name.to_string(), |f| f.to_string_lossy().into_owned());
        let reference = match self.config.devtool {
            Devtool::None => return vec![Artifact::new(name, code)],
            Devtool::SourceMap => format!("{file}.map"),
            Devtool::InlineSourceMap => format!(
                "data:application/json;charset=utf-8;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(map.to_json(&file))
            ),
        };
        match comment {
            Comment::Line => {
                let _ = writeln!(code, "//# sourceMappingURL={reference}");
            }
            Comment::Block => {
                let _ = writeln!(code, "/*# sourceMappingURL={reference} */");
            }
        }

        let mut artifacts = vec![Artifact::new(name, code)];
        if self.config.devtool == Devtool::SourceMap {
            artifacts.push(Artifact::new(format!("{name}.map"), map.to_json(&file)));
        }
        artifacts
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!("{ASSET_PLACEHOLDER_PREFIX}(\\d+)__"))
            .unwrap_or_else(|e| unreachable!("placeholder pattern is valid: {e}"))
    })
}

/// A module on a cycle of style imports among `styles`, if there is one.
fn style_cycle(graph: &ModuleGraph, styles: &[&ModuleNode]) -> Option<String> {
    let style_ids: HashSet<&str> = styles.iter().map(|n| n.id.as_str()).collect();
    let edges = |node: &ModuleNode| -> Vec<String> {
        node.dependencies
            .iter()
            .filter(|d| d.kind == DependencyKind::StyleImport)
            .filter_map(|d| d.target_id())
            .filter(|id| style_ids.contains(id.as_str()))
            .collect()
    };

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Active,
        Done,
    }
    let mut marks: HashMap<String, Mark> = HashMap::default();

    for start in styles {
        if marks.contains_key(&start.id) {
            continue;
        }
        let mut stack: Vec<(String, Vec<String>)> = vec![(start.id.clone(), edges(start))];
        marks.insert(start.id.clone(), Mark::Active);
        while let Some((id, pending)) = stack.last_mut() {
            match pending.pop() {
                Some(next) => match marks.get(&next) {
                    Some(Mark::Active) => return Some(next),
                    Some(Mark::Done) => {}
                    None => {
                        let node = graph.get(&next)?;
                        marks.insert(next.clone(), Mark::Active);
                        let next_edges = edges(node);
                        stack.push((next, next_edges));
                    }
                },
                None => {
                    marks.insert(id.clone(), Mark::Done);
                    stack.pop();
                }
            }
        }
    }
    None
}

/// Write artifacts under `dir` atomically. With `clean`, files in `dir` that
/// were not written are removed afterwards.
///
/// Returns the number of files written, or a report of `WRITE_FAILED`
/// diagnostics.
pub fn write_outputs(dir: &Path, artifacts: &[Artifact], clean: bool) -> Result<usize, BuildReport> {
    let mut report = BuildReport::new();
    let mut keep = std::collections::HashSet::new();
    for artifact in artifacts {
        let target = dir.join(&artifact.path);
        if let Err(e) = atomic_write(&target, &artifact.contents) {
            report.push(Diagnostic::emission(
                codes::WRITE_FAILED,
                &normalize_slashes(&target),
                "write",
                e.to_string(),
            ));
        }
        keep.insert(target);
    }
    if !report.is_empty() {
        return Err(report);
    }
    if clean {
        match remove_stale_files(dir, &keep) {
            Ok(removed) => {
                for path in removed {
                    debug!(path = %path.display(), "removed stale output");
                }
            }
            Err(e) => warn!(dir = %dir.display(), error = %e, "failed to clean output directory"),
        }
    }
    Ok(artifacts.len())
}
