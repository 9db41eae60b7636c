//! Build passes.
//!
//! A [`Compiler`] owns everything that outlives a single pass: the compiled
//! rule set, the asset table and the transform cache. Each call to
//! [`Compiler::run`] is one pass: reset the asset table, build the graph,
//! emit. Nothing is written to disk until the caller asks for it, so a pass
//! that is cancelled or fails leaves the previous output untouched.

use crate::assets::AssetNamer;
use crate::config::Config;
use crate::emit::{emit, write_outputs, Artifact, BundleSummary};
use crate::error::{BuildReport, ConfigError, Error};
use crate::graph::{GraphBuilder, TransformCache};
use crate::rules::RuleSet;
use crate::transform::StageRegistry;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Issues cancellation tokens. Issuing a new token cancels every token
/// issued before it.
#[derive(Debug, Clone, Default)]
pub struct CancelSource {
    current: Arc<AtomicU64>,
}

impl CancelSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation and return its token.
    #[must_use]
    pub fn next(&self) -> CancelToken {
        let generation = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        CancelToken {
            current: Arc::clone(&self.current),
            generation,
        }
    }

    /// Cancel the outstanding token without issuing a usable one.
    pub fn cancel(&self) {
        self.current.fetch_add(1, Ordering::SeqCst);
    }
}

/// Handed to a build pass; checked between units of work.
#[derive(Debug, Clone)]
pub struct CancelToken {
    current: Arc<AtomicU64>,
    generation: u64,
}

impl CancelToken {
    /// A token that is never cancelled.
    #[must_use]
    pub fn never() -> Self {
        CancelSource::new().next()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.current.load(Ordering::SeqCst) != self.generation
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Everything one pass produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildOutput {
    pub generation: u64,
    #[serde(skip)]
    pub artifacts: Vec<Artifact>,
    pub bundles: Vec<BundleSummary>,
    /// Modules built in this pass.
    pub modules: usize,
    pub assets: usize,
    pub duration_ms: u64,
    /// Resolution, transform and emission diagnostics. Entry groups that
    /// hit one are missing from `bundles`.
    pub report: BuildReport,
}

impl BuildOutput {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.report.is_empty()
    }
}

/// Long-lived build state for one configuration.
#[derive(Debug)]
pub struct Compiler {
    config: Config,
    rules: RuleSet,
    assets: AssetNamer,
    cache: TransformCache,
}

impl Compiler {
    /// Compile the config's rules against the built-in stages.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        Self::with_registry(config, &StageRegistry::with_builtins())
    }

    pub fn with_registry(config: Config, registry: &StageRegistry) -> Result<Self, ConfigError> {
        config.validate()?;
        let rules = RuleSet::compile(&config.rules, config.rule_policy, registry, &config.shared)?;
        let assets = AssetNamer::new(&config.root, config.output.public_path.clone());
        Ok(Self {
            config,
            rules,
            assets,
            cache: TransformCache::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Drop cached transforms for changed files.
    pub fn invalidate(&self, paths: &[PathBuf]) {
        self.cache.invalidate(paths);
    }

    /// Run one pass in memory.
    ///
    /// Returns `Err` only for configuration errors and cancellation; module
    /// level problems are collected in [`BuildOutput::report`].
    pub fn run(&self, cancel: &CancelToken) -> Result<BuildOutput, Error> {
        let started = Instant::now();
        self.assets.reset();

        let builder = GraphBuilder::new(&self.config, &self.rules, &self.assets, &self.cache, cancel);
        let (graph, mut report) = builder.build(&self.config.entry_groups())?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled {
                generation: cancel.generation(),
            });
        }

        let assets = self.assets.snapshot();
        let emitted = emit(&self.config, &graph, &assets);
        report.extend(emitted.report.diagnostics);
        report.normalize();

        let output = BuildOutput {
            generation: cancel.generation(),
            artifacts: emitted.artifacts,
            bundles: emitted.bundles,
            modules: graph.len(),
            assets: assets.len(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            report,
        };
        info!(
            generation = output.generation,
            modules = output.modules,
            bundles = output.bundles.len(),
            errors = output.report.len(),
            duration_ms = output.duration_ms,
            "build pass finished"
        );
        Ok(output)
    }

    /// Write a pass's artifacts to the output directory.
    pub fn write(&self, output: &BuildOutput) -> Result<usize, BuildReport> {
        let dir = self.config.output_dir();
        debug!(dir = %dir.display(), files = output.artifacts.len(), "writing outputs");
        write_outputs(&dir, &output.artifacts, self.config.output.clean)
    }

    /// One-shot build: run a pass and write whatever it emitted. Write
    /// failures are added to the returned report.
    pub fn build(&self) -> Result<BuildOutput, Error> {
        let mut output = self.run(&CancelToken::never())?;
        if let Err(write_report) = self.write(&output) {
            output.report.extend(write_report.diagnostics);
            output.report.normalize();
        }
        Ok(output)
    }
}
