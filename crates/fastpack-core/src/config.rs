//! Build configuration.
//!
//! Loaded from a JSON document (`fastpack.json`). All relative paths are
//! resolved against the directory containing the config file.

use crate::error::ConfigError;
use crate::rules::MatchPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default config file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "fastpack.json";

/// Name used for the entry group when `entry` is a string or a list.
pub const DEFAULT_ENTRY_NAME: &str = "main";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory the config was loaded from; relative paths resolve here.
    #[serde(skip)]
    pub root: PathBuf,

    pub entry: EntrySpec,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub devtool: Devtool,

    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    #[serde(default)]
    pub rule_policy: MatchPolicy,

    /// Extensions bundled unmodified when no rule matches.
    #[serde(default = "default_pass_through")]
    pub pass_through_extensions: Vec<String>,

    #[serde(default)]
    pub resolve: ResolveConfig,

    /// Option bag handed to every stage (e.g. compiler target options).
    #[serde(default)]
    pub shared: serde_json::Map<String, Value>,

    #[serde(default)]
    pub dev_server: DevServerConfig,
}

/// Entry points: a file, a list of files, or named groups of either.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntrySpec {
    One(String),
    Many(Vec<String>),
    Named(BTreeMap<String, OneOrMany>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s],
            Self::Many(v) => v,
        }
    }
}

/// A named set of entry files that produce one script bundle (and at most
/// one extracted style bundle).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryGroup {
    pub name: String,
    pub files: Vec<PathBuf>,
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_output_path")]
    pub path: PathBuf,
    /// Script bundle name template; `[name]` is the entry group name.
    #[serde(default = "default_filename")]
    pub filename: String,
    /// Extracted stylesheet name template.
    #[serde(default = "default_style_filename")]
    pub style_filename: String,
    /// Prefix for asset URLs written into bundles.
    #[serde(default)]
    pub public_path: String,
    /// Remove files in the output directory that the build did not write.
    #[serde(default)]
    pub clean: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            filename: default_filename(),
            style_filename: default_style_filename(),
            public_path: String::new(),
            clean: false,
        }
    }
}

/// Source map flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Devtool {
    /// Separate `.map` file next to each bundle.
    #[default]
    SourceMap,
    /// Base64 data URL in the trailing comment.
    InlineSourceMap,
    None,
}

/// One rule as written in the config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    pub test: String,
    #[serde(default)]
    pub exclude: Option<ExcludeConfig>,
    #[serde(rename = "use")]
    pub stages: StageList,
    /// Keep matching later rules even under `first-match`.
    #[serde(default)]
    pub additive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExcludeConfig {
    Pattern(String),
    Scoped { pattern: String, except: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageList {
    One(StageUse),
    Many(Vec<StageUse>),
}

impl StageList {
    #[must_use]
    pub fn as_slice(&self) -> &[StageUse] {
        match self {
            Self::One(u) => std::slice::from_ref(u),
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StageUse {
    Id(String),
    Full {
        loader: String,
        #[serde(default)]
        options: Value,
    },
}

impl StageUse {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) | Self::Full { loader: id, .. } => id,
        }
    }

    #[must_use]
    pub fn options(&self) -> &Value {
        match self {
            Self::Id(_) => &Value::Null,
            Self::Full { options, .. } => options,
        }
    }
}

/// Module resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolveConfig {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_modules")]
    pub modules: Vec<PathBuf>,
    #[serde(default = "default_main_fields")]
    pub main_fields: Vec<String>,
    #[serde(default = "default_main_files")]
    pub main_files: Vec<String>,
}

impl Default for ResolveConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            modules: default_modules(),
            main_fields: default_main_fields(),
            main_files: default_main_files(),
        }
    }
}

/// Dev server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DevServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory served for everything outside `public_path`.
    #[serde(default = "default_content_base")]
    pub content_base: PathBuf,
    /// URL prefix under which build output is served.
    #[serde(default = "default_dev_public_path")]
    pub public_path: String,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            content_base: default_content_base(),
            public_path: default_dev_public_path(),
        }
    }
}

fn default_pass_through() -> Vec<String> {
    ["js", "mjs", "cjs"].iter().map(|s| (*s).to_string()).collect()
}

fn default_output_path() -> PathBuf {
    PathBuf::from("dist")
}

fn default_filename() -> String {
    "[name].js".to_string()
}

fn default_style_filename() -> String {
    "styles.css".to_string()
}

fn default_extensions() -> Vec<String> {
    [".js", ".mjs", ".json"].iter().map(|s| (*s).to_string()).collect()
}

fn default_modules() -> Vec<PathBuf> {
    vec![PathBuf::from("node_modules")]
}

fn default_main_fields() -> Vec<String> {
    vec!["main".to_string()]
}

fn default_main_files() -> Vec<String> {
    vec!["index".to_string()]
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_content_base() -> PathBuf {
    PathBuf::from(".")
}

fn default_dev_public_path() -> String {
    "/".to_string()
}

impl Config {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let root = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let mut config: Self =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.root = dunce::canonicalize(&root).unwrap_or(root);
        config.validate()?;
        Ok(config)
    }

    /// Find `fastpack.json` in `cwd` and load it.
    pub fn discover(cwd: &Path) -> Result<Self, ConfigError> {
        let path = cwd.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Err(ConfigError::NotFound {
                dir: cwd.to_path_buf(),
            });
        }
        Self::load(&path)
    }

    /// Parse a config from a JSON string with an explicit root.
    pub fn from_json(json: &str, root: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            path: root.join(CONFIG_FILE_NAME),
            source,
        })?;
        config.root = root.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Structural checks that do not need the stage registry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let groups = self.entry_groups();
        if groups.is_empty() {
            return Err(ConfigError::NoEntries);
        }
        for group in &groups {
            if group.files.is_empty() {
                return Err(ConfigError::EmptyEntry {
                    name: group.name.clone(),
                });
            }
        }
        if !self.output.filename.contains("[name]") && groups.len() > 1 {
            return Err(ConfigError::Invalid {
                field: "output.filename",
                message: format!(
                    "`{}` must contain [name] when there are {} entry groups",
                    self.output.filename,
                    groups.len()
                ),
            });
        }
        if self.output.clean && self.root.starts_with(self.output_dir()) {
            return Err(ConfigError::Invalid {
                field: "output.clean",
                message: format!(
                    "output path `{}` contains the project root; refusing to clean it",
                    self.output.path.display()
                ),
            });
        }
        if !self.dev_server.public_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                field: "dev_server.public_path",
                message: format!("`{}` must start with '/'", self.dev_server.public_path),
            });
        }
        Ok(())
    }

    /// Entry groups in a stable order with absolute file paths.
    #[must_use]
    pub fn entry_groups(&self) -> Vec<EntryGroup> {
        let to_paths = |files: Vec<String>| -> Vec<PathBuf> {
            files.into_iter().map(|f| self.root.join(f)).collect()
        };
        match self.entry.clone() {
            EntrySpec::One(file) => vec![EntryGroup {
                name: DEFAULT_ENTRY_NAME.to_string(),
                files: to_paths(vec![file]),
            }],
            EntrySpec::Many(files) => vec![EntryGroup {
                name: DEFAULT_ENTRY_NAME.to_string(),
                files: to_paths(files),
            }],
            EntrySpec::Named(map) => map
                .into_iter()
                .map(|(name, files)| EntryGroup {
                    name,
                    files: to_paths(files.into_vec()),
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.output.path)
    }

    #[must_use]
    pub fn content_base(&self) -> PathBuf {
        self.root.join(&self.dev_server.content_base)
    }

    /// Whether files with this extension may be bundled with no rule.
    #[must_use]
    pub fn is_pass_through(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        self.pass_through_extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }
}

/// Expand a `[name]` filename template.
#[must_use]
pub fn expand_name(template: &str, name: &str) -> String {
    template.replace("[name]", name)
}
