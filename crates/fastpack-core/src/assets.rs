//! Asset naming.
//!
//! Computes stable output names for static assets (fonts, images) from a
//! template, and owns the table of assets emitted during a build.
//!
//! ## Templates
//!
//! | Token      | Expands to                                        |
//! |------------|---------------------------------------------------|
//! | `[name]`   | file stem (`logo` for `img/logo.png`)             |
//! | `[ext]`    | extension without the dot (`png`)                 |
//! | `[hash]`   | 20 hex chars of the BLAKE3 content hash           |
//! | `[hash:N]` | first `N` hex chars of the content hash           |
//! | `[path]`   | directory relative to the project root, with `/`  |
//!
//! Stages only prepare records. The graph builder claims names after each
//! wave in frontier order, so the same module wins a contested name on every
//! run. Check-and-insert happens under one lock.

use fastpack_util::fs::normalize_slashes;
use fastpack_util::hash::blake3_bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Default `[hash]` length.
pub const DEFAULT_HASH_LEN: usize = 20;

/// Template used when a stage does not configure one.
pub const DEFAULT_TEMPLATE: &str = "[hash].[ext]";

/// A named asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetRecord {
    pub original: PathBuf,
    /// Path relative to the output directory.
    pub output_name: String,
    /// URL written into bundles.
    pub public_url: String,
    /// Full BLAKE3 hex digest of the contents.
    pub hash: String,
    #[serde(skip)]
    pub contents: Arc<[u8]>,
}

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("asset name `{output_name}` is claimed by both {} and {}", .existing.display(), .incoming.display())]
    Collision {
        output_name: String,
        existing: PathBuf,
        incoming: PathBuf,
    },

    #[error("invalid asset template `{template}`: {message}")]
    Template { template: String, message: String },
}

/// The asset table for one build.
#[derive(Debug)]
pub struct AssetNamer {
    root: PathBuf,
    public_path: String,
    table: Mutex<BTreeMap<String, AssetRecord>>,
}

impl AssetNamer {
    /// `root` anchors `[path]`; `public_path` prefixes every URL unless a
    /// stage overrides it.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, public_path: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_path: public_path.into(),
            table: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, AssetRecord>> {
        // A panic while holding the lock leaves the map itself intact.
        self.table.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Compute the record for an asset without claiming its name.
    pub fn prepare(
        &self,
        original: &Path,
        contents: Arc<[u8]>,
        template: &str,
        public_path: Option<&str>,
    ) -> Result<AssetRecord, AssetError> {
        let hash = blake3_bytes(&contents);
        let output_name = self.expand(original, template, &hash)?;
        let prefix = public_path.unwrap_or(&self.public_path);
        Ok(AssetRecord {
            original: original.to_path_buf(),
            public_url: join_url(prefix, &output_name),
            output_name,
            hash,
            contents,
        })
    }

    /// Compute the record for an asset and claim its name.
    pub fn name_with_content(
        &self,
        original: &Path,
        contents: Arc<[u8]>,
        template: &str,
        public_path: Option<&str>,
    ) -> Result<AssetRecord, AssetError> {
        let record = self.prepare(original, contents, template, public_path)?;
        self.register(record)
    }

    /// Claim a record's output name, or return the record already present
    /// for the same original. Whoever registers first keeps the name, so
    /// callers that need a stable winner register in a fixed order.
    pub fn register(&self, record: AssetRecord) -> Result<AssetRecord, AssetError> {
        let mut table = self.lock();
        if let Some(existing) = table.get(&record.output_name) {
            if existing.original == record.original {
                return Ok(existing.clone());
            }
            return Err(AssetError::Collision {
                output_name: record.output_name.clone(),
                existing: existing.original.clone(),
                incoming: record.original,
            });
        }
        tracing::debug!(original = %record.original.display(), name = %record.output_name, "asset named");
        table.insert(record.output_name.clone(), record.clone());
        Ok(record)
    }

    /// Forget every record. Called at the start of each full rebuild.
    pub fn reset(&self) {
        self.lock().clear();
    }

    /// All records sorted by output name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<AssetRecord> {
        self.lock().values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn expand(&self, original: &Path, template: &str, hash: &str) -> Result<String, AssetError> {
        let stem = original.file_stem().and_then(|s| s.to_str()).unwrap_or("asset");
        let ext = original.extension().and_then(|s| s.to_str()).unwrap_or("");
        let dir = original
            .parent()
            .and_then(|p| p.strip_prefix(&self.root).ok())
            .map(normalize_slashes)
            .filter(|d| !d.is_empty())
            .map(|d| format!("{d}/"))
            .unwrap_or_default();

        let mut out = String::with_capacity(template.len() + hash.len());
        let mut rest = template;
        while let Some(open) = rest.find('[') {
            out.push_str(&rest[..open]);
            let Some(close) = rest[open..].find(']') else {
                return Err(AssetError::Template {
                    template: template.to_string(),
                    message: "unterminated `[`".to_string(),
                });
            };
            let token = &rest[open + 1..open + close];
            match token {
                "name" => out.push_str(stem),
                "ext" => out.push_str(ext),
                "path" => out.push_str(&dir),
                "hash" => out.push_str(&hash[..DEFAULT_HASH_LEN]),
                _ => {
                    let len = token
                        .strip_prefix("hash:")
                        .and_then(|n| n.parse::<usize>().ok())
                        .filter(|n| (1..=hash.len()).contains(n))
                        .ok_or_else(|| AssetError::Template {
                            template: template.to_string(),
                            message: format!("unknown token `[{token}]`"),
                        })?;
                    out.push_str(&hash[..len]);
                }
            }
            rest = &rest[open + close + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Join a public path prefix and an output name with exactly one `/`
/// between them. An empty prefix yields a relative URL.
#[must_use]
pub fn join_url(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", prefix.trim_end_matches('/'), name.trim_start_matches('/'))
}
