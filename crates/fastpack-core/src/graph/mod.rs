//! Module graph.
//!
//! Nodes are keyed by their normalized canonical path. The graph records
//! discovery order, which the emitter uses to break ties so output does not
//! depend on worker scheduling.

mod builder;
pub mod resolve;

pub use builder::{GraphBuilder, TransformCache};
pub use resolve::{ResolveError, Resolver};

use crate::assets::AssetRecord;
use crate::sourcemap::SourceMap;
use crate::transform::{DependencyKind, OutputKind};
use fastpack_util::fs::normalize_slashes;
use rustc_hash::{FxHashMap as HashMap, FxHashSet as HashSet};
use std::path::{Path, PathBuf};

/// Graph key for a path.
#[must_use]
pub fn module_id(path: &Path) -> String {
    normalize_slashes(path)
}

/// A dependency edge as written in the importer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependency {
    pub specifier: String,
    pub kind: DependencyKind,
    /// `None` when resolution failed.
    pub resolved: Option<PathBuf>,
}

impl ResolvedDependency {
    #[must_use]
    pub fn target_id(&self) -> Option<String> {
        self.resolved.as_deref().map(module_id)
    }
}

/// A transformed module.
#[derive(Debug, Clone)]
pub struct ModuleNode {
    pub id: String,
    pub path: PathBuf,
    /// Original text, when the file is valid UTF-8.
    pub source: Option<String>,
    /// Content after the transform chain.
    pub content: String,
    pub map: Option<SourceMap>,
    /// In discovery order.
    pub dependencies: Vec<ResolvedDependency>,
    pub kind: OutputKind,
    pub assets: Vec<AssetRecord>,
    /// Position in discovery order.
    pub order: usize,
}

/// One configured entry group, resolved to node ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryGroupNodes {
    pub name: String,
    pub entries: Vec<String>,
    /// Entry files that could not be found.
    pub missing: Vec<PathBuf>,
}

/// The module graph of one build pass.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    nodes: Vec<ModuleNode>,
    index: HashMap<String, usize>,
    /// Modules that failed to read or transform, or that have an unresolved
    /// dependency.
    errored: HashSet<String>,
    groups: Vec<EntryGroupNodes>,
}

impl ModuleGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node, assigning its discovery order. A node with the same id
    /// replaces the old one in place.
    pub fn insert(&mut self, mut node: ModuleNode) {
        if let Some(&idx) = self.index.get(&node.id) {
            node.order = self.nodes[idx].order;
            self.nodes[idx] = node;
            return;
        }
        node.order = self.nodes.len();
        self.index.insert(node.id.clone(), self.nodes.len());
        self.nodes.push(node);
    }

    pub fn mark_errored(&mut self, id: impl Into<String>) {
        self.errored.insert(id.into());
    }

    pub fn add_group(&mut self, group: EntryGroupNodes) {
        self.groups.push(group);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ModuleNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    #[must_use]
    pub fn nodes(&self) -> &[ModuleNode] {
        &self.nodes
    }

    #[must_use]
    pub fn groups(&self) -> &[EntryGroupNodes] {
        &self.groups
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn is_errored(&self, id: &str) -> bool {
        self.errored.contains(id) || !self.index.contains_key(id)
    }

    /// The resolved target node of a dependency, if it was built.
    #[must_use]
    pub fn target(&self, dep: &ResolvedDependency) -> Option<&ModuleNode> {
        dep.target_id().and_then(|id| self.get(&id))
    }

    /// Depth-first post-order from `entries`: every module appears after the
    /// modules it depends on, except where a cycle makes that impossible.
    /// Dependencies are visited in discovery order, entries in the given
    /// order. Each module appears once.
    #[must_use]
    pub fn emission_order(&self, entries: &[String]) -> Vec<&ModuleNode> {
        let mut order = Vec::new();
        let mut visited: HashSet<&str> = HashSet::default();
        // (node, next dependency to look at)
        let mut stack: Vec<(&ModuleNode, usize)> = Vec::new();

        for entry in entries {
            let Some(root) = self.get(entry) else { continue };
            if !visited.insert(&root.id) {
                continue;
            }
            stack.push((root, 0));

            while let Some((node, next)) = stack.last_mut() {
                let node = *node;
                if let Some(dep) = node.dependencies.get(*next) {
                    *next += 1;
                    if let Some(target) = self.target(dep) {
                        if visited.insert(&target.id) {
                            stack.push((target, 0));
                        }
                    }
                } else {
                    stack.pop();
                    order.push(node);
                }
            }
        }
        order
    }

    /// Whether anything reachable from `entries` errored, including edges
    /// that point at modules never built.
    #[must_use]
    pub fn has_errors_reachable(&self, entries: &[String]) -> bool {
        let mut visited: HashSet<&str> = HashSet::default();
        let mut stack: Vec<&str> = entries.iter().map(String::as_str).collect();
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            if self.is_errored(id) {
                return true;
            }
            if let Some(node) = self.get(id) {
                for dep in &node.dependencies {
                    match dep.resolved.as_deref() {
                        Some(path) => {
                            if let Some(target) = self.get(&module_id(path)) {
                                stack.push(&target.id);
                            } else {
                                return true;
                            }
                        }
                        None => return true,
                    }
                }
            }
        }
        false
    }
}
