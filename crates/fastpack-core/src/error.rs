use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Core error type for fastpack operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Build(BuildReport),

    #[error("build pass {generation} was superseded")]
    Cancelled { generation: u64 },
}

/// Configuration problems. Always fatal: the build never starts, or stops at
/// the first file that needs a transform nobody configured.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config at {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Config file not found in {}", .dir.display())]
    NotFound { dir: PathBuf },

    #[error("rule #{rule}: invalid pattern `{pattern}`: {message}")]
    InvalidPattern {
        rule: usize,
        pattern: String,
        message: String,
    },

    #[error("rule #{rule}: stage list is empty")]
    EmptyStages { rule: usize },

    #[error("rule #{rule}: unknown stage `{stage}` (registered: {known})")]
    UnknownStage {
        rule: usize,
        stage: String,
        known: String,
    },

    #[error("rule #{rule}: invalid options for stage `{stage}`: {message}")]
    InvalidStageOptions {
        rule: usize,
        stage: String,
        message: String,
    },

    #[error("no entry points configured")]
    NoEntries,

    #[error("entry `{name}` lists no files")]
    EmptyEntry { name: String },

    #[error("no rule matches {path} and its extension is not pass-through (patterns: {patterns})")]
    NoMatchingRule { path: String, patterns: String },

    #[error("{field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Which phase of a build pass produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    /// An import specifier matched no file.
    Resolution,
    /// A stage failed, or the module could not be read.
    Transform,
    /// Naming collision or a broken style extraction. Fatal to one bundle.
    Emission,
}

/// A single recoverable build problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Stable machine-readable code (SCREAMING_SNAKE_CASE).
    pub code: &'static str,
    /// The module the problem belongs to.
    pub path: String,
    /// Stage id, unresolved specifier, or bundle name.
    pub context: String,
    pub message: String,
}

impl Diagnostic {
    #[must_use]
    pub fn resolution(importer: &str, specifier: &str, message: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::Resolution,
            code: codes::RESOLVE_FAILED,
            path: importer.to_string(),
            context: specifier.to_string(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn transform(path: &str, stage: &str, message: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::Transform,
            code: codes::TRANSFORM_FAILED,
            path: path.to_string(),
            context: stage.to_string(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn read_failed(path: &str, message: impl Into<String>) -> Self {
        Self {
            kind: DiagnosticKind::Transform,
            code: codes::READ_FAILED,
            path: path.to_string(),
            context: "read".to_string(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn emission(
        code: &'static str,
        path: &str,
        bundle: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind: DiagnosticKind::Emission,
            code,
            path: path.to_string(),
            context: bundle.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}]: {}",
            self.code, self.path, self.context, self.message
        )
    }
}

/// Stable diagnostic codes.
pub mod codes {
    pub const RESOLVE_FAILED: &str = "RESOLVE_FAILED";
    pub const TRANSFORM_FAILED: &str = "TRANSFORM_FAILED";
    pub const READ_FAILED: &str = "READ_FAILED";
    pub const ASSET_NAME_COLLISION: &str = "ASSET_NAME_COLLISION";
    pub const STYLE_CYCLE: &str = "STYLE_CYCLE";
    pub const WRITE_FAILED: &str = "WRITE_FAILED";
}

/// All diagnostics of one build pass, reported together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub diagnostics: Vec<Diagnostic>,
}

impl BuildReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn extend(&mut self, diagnostics: impl IntoIterator<Item = Diagnostic>) {
        self.diagnostics.extend(diagnostics);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    /// Diagnostics attached to `path`.
    pub fn for_path<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Diagnostic> + 'a {
        self.diagnostics.iter().filter(move |d| d.path == path)
    }

    /// Sort and dedupe so reports are stable across runs.
    pub fn normalize(&mut self) {
        self.diagnostics.sort_by(|a, b| {
            (a.kind, &a.path, &a.context, &a.message).cmp(&(b.kind, &b.path, &b.context, &b.message))
        });
        self.diagnostics.dedup();
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "build failed with {} error(s):", self.diagnostics.len())?;
        for diagnostic in &self.diagnostics {
            writeln!(f, "  {diagnostic}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BuildReport {}
