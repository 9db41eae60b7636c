//! Breadth-first graph construction.
//!
//! Each wave reads, matches and transforms the current frontier in parallel on
//! the rayon pool, then merges the results in frontier order. Whatever order
//! workers finish in, nodes are discovered in the same order every time.

use super::resolve::Resolver;
use super::{module_id, EntryGroupNodes, ModuleGraph, ModuleNode, ResolvedDependency};
use crate::assets::{AssetError, AssetNamer};
use crate::build::CancelToken;
use crate::config::{Config, EntryGroup};
use crate::error::{codes, BuildReport, ConfigError, Diagnostic, Error};
use crate::rules::RuleSet;
use crate::transform::stages::script::ScriptStage;
use crate::transform::{run_stages, ConfiguredStage, StageError, TransformOutcome};
use fastpack_util::hash::blake3_bytes;
use rayon::prelude::*;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct CachedTransform {
    content_hash: String,
    stage_ids: Vec<String>,
    outcome: TransformOutcome,
}

/// Transform results kept between passes.
///
/// An entry is reused only when the file's bytes and its stage list are
/// unchanged; [`invalidate`](Self::invalidate) drops entries eagerly when the
/// watcher reports a change, including entries whose stages read the
/// changed file on the side.
#[derive(Debug, Default)]
pub struct TransformCache {
    entries: Mutex<HashMap<PathBuf, CachedTransform>>,
}

impl TransformCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, CachedTransform>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn get(&self, path: &Path, content_hash: &str, stage_ids: &[String]) -> Option<TransformOutcome> {
        let entries = self.lock();
        let cached = entries.get(path)?;
        (cached.content_hash == content_hash && cached.stage_ids == stage_ids)
            .then(|| cached.outcome.clone())
    }

    fn put(&self, path: PathBuf, cached: CachedTransform) {
        self.lock().insert(path, cached);
    }

    /// Forget the given paths and every entry that watched one of them.
    /// Paths are compared after canonicalization when they still exist.
    ///
    /// A path that neither names a cached module nor was watched by one may
    /// still be read by a stage that cannot report its inputs (an external
    /// command, say), so it drops the whole cache.
    pub fn invalidate(&self, paths: &[PathBuf]) {
        let mut entries = self.lock();
        for path in paths {
            let canonical = dunce::canonicalize(path).unwrap_or_else(|_| path.clone());
            let before = entries.len();
            entries.remove(&canonical);
            entries.remove(path);
            entries.retain(|_, cached| {
                !cached
                    .outcome
                    .watched
                    .iter()
                    .any(|w| *w == canonical || w == path)
            });
            if entries.len() == before && before > 0 {
                debug!(path = %path.display(), "unknown input changed, dropping transform cache");
                entries.clear();
            }
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of processing one frontier path.
enum Processed {
    Node {
        node: ModuleNode,
        diagnostics: Vec<Diagnostic>,
    },
    Failed(Diagnostic),
    Fatal(ConfigError),
    Cancelled,
}

/// Builds the module graph for one pass.
pub struct GraphBuilder<'a> {
    config: &'a Config,
    rules: &'a RuleSet,
    assets: &'a AssetNamer,
    cache: &'a TransformCache,
    cancel: &'a CancelToken,
    resolver: Resolver,
    implicit: Vec<ConfiguredStage>,
}

impl<'a> GraphBuilder<'a> {
    #[must_use]
    pub fn new(
        config: &'a Config,
        rules: &'a RuleSet,
        assets: &'a AssetNamer,
        cache: &'a TransformCache,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            config,
            rules,
            assets,
            cache,
            cancel,
            resolver: Resolver::new(config.resolve.clone()),
            implicit: vec![ConfiguredStage {
                id: crate::transform::stages::script::ID.to_string(),
                stage: Arc::new(ScriptStage::default()),
            }],
        }
    }

    /// Build the graph reachable from `groups`.
    ///
    /// Recoverable problems land in the returned report; a configuration
    /// error or cancellation aborts the pass.
    pub fn build(&self, groups: &[EntryGroup]) -> Result<(ModuleGraph, BuildReport), Error> {
        let mut graph = ModuleGraph::new();
        let mut report = BuildReport::new();
        let mut seen: HashSet<PathBuf> = HashSet::default();
        let mut frontier: Vec<PathBuf> = Vec::new();

        for group in groups {
            let mut entries = Vec::new();
            let mut missing = Vec::new();
            for file in &group.files {
                match dunce::canonicalize(file) {
                    Ok(path) if path.is_file() => {
                        entries.push(module_id(&path));
                        if seen.insert(path.clone()) {
                            frontier.push(path);
                        }
                    }
                    _ => {
                        report.push(Diagnostic::resolution(
                            &format!("entry:{}", group.name),
                            &module_id(file),
                            "entry file not found",
                        ));
                        missing.push(file.clone());
                    }
                }
            }
            graph.add_group(EntryGroupNodes {
                name: group.name.clone(),
                entries,
                missing,
            });
        }

        let mut wave = 0;
        while !frontier.is_empty() {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled {
                    generation: self.cancel.generation(),
                });
            }
            debug!(wave, modules = frontier.len(), "transforming wave");

            let results: Vec<Processed> = frontier.par_iter().map(|path| self.process(path)).collect();

            let mut next = Vec::new();
            for (path, result) in frontier.iter().zip(results) {
                match result {
                    Processed::Fatal(err) => return Err(err.into()),
                    Processed::Cancelled => {
                        return Err(Error::Cancelled {
                            generation: self.cancel.generation(),
                        })
                    }
                    Processed::Failed(diagnostic) => {
                        graph.mark_errored(module_id(path));
                        report.push(diagnostic);
                    }
                    Processed::Node {
                        node,
                        mut diagnostics,
                    } => {
                        // Claimed here, in frontier order, so a contested
                        // name goes to the same module on every run.
                        for record in &node.assets {
                            if let Err(e) = self.assets.register(record.clone()) {
                                diagnostics.push(asset_diagnostic(&node.id, &e));
                            }
                        }
                        for dep in &node.dependencies {
                            if let Some(target) = &dep.resolved {
                                if seen.insert(target.clone()) {
                                    next.push(target.clone());
                                }
                            }
                        }
                        if !diagnostics.is_empty() {
                            graph.mark_errored(node.id.clone());
                            report.extend(diagnostics);
                        }
                        graph.insert(node);
                    }
                }
            }
            frontier = next;
            wave += 1;
        }

        Ok((graph, report))
    }

    /// Read, match, transform and resolve one module.
    fn process(&self, path: &Path) -> Processed {
        if self.cancel.is_cancelled() {
            return Processed::Cancelled;
        }
        let id = module_id(path);

        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) => return Processed::Failed(Diagnostic::read_failed(&id, e.to_string())),
        };

        let matched = self.rules.match_path(path);
        let stages = if !matched.is_empty() {
            matched
        } else if self.config.is_pass_through(path) {
            self.implicit.clone()
        } else {
            return Processed::Fatal(ConfigError::NoMatchingRule {
                path: id,
                patterns: self.rules.patterns(),
            });
        };
        let stage_ids: Vec<String> = stages.iter().map(|s| s.id.clone()).collect();

        let content_hash = blake3_bytes(&raw);
        let outcome = match self.cache.get(path, &content_hash, &stage_ids) {
            Some(outcome) => {
                trace!(module = %id, "transform cache hit");
                outcome
            }
            None => {
                debug!(module = %id, stages = ?stage_ids, "transforming");
                match run_stages(path, &raw, &stages, &self.config.shared, self.assets) {
                    Ok(outcome) => {
                        self.cache.put(
                            path.to_path_buf(),
                            CachedTransform {
                                content_hash,
                                stage_ids,
                                outcome: outcome.clone(),
                            },
                        );
                        outcome
                    }
                    Err(failure) => {
                        let diagnostic = match &failure.error {
                            StageError::Asset(e) => asset_diagnostic(&id, e),
                            StageError::Failed(message) => {
                                Diagnostic::transform(&id, &failure.stage, message.clone())
                            }
                        };
                        return Processed::Failed(diagnostic);
                    }
                }
            }
        };

        let mut diagnostics = Vec::new();
        let dependencies = outcome
            .dependencies
            .iter()
            .map(|dep| {
                let resolved = match self.resolver.resolve(&dep.specifier, path) {
                    Ok(target) => Some(target),
                    Err(e) => {
                        diagnostics.push(Diagnostic::resolution(&id, &dep.specifier, e.message));
                        None
                    }
                };
                ResolvedDependency {
                    specifier: dep.specifier.clone(),
                    kind: dep.kind,
                    resolved,
                }
            })
            .collect();

        Processed::Node {
            node: ModuleNode {
                id,
                path: path.to_path_buf(),
                source: String::from_utf8(raw).ok(),
                content: outcome.content,
                map: outcome.map,
                dependencies,
                kind: outcome.kind,
                assets: outcome.assets,
                order: 0,
            },
            diagnostics,
        }
    }
}

fn asset_diagnostic(id: &str, error: &AssetError) -> Diagnostic {
    let context = match error {
        AssetError::Collision { output_name, .. } => output_name.clone(),
        _ => "asset".to_string(),
    };
    Diagnostic::emission(codes::ASSET_NAME_COLLISION, id, &context, error.to_string())
}
