//! Import specifier resolution.
//!
//! Resolves import specifiers to canonical file paths.
//!
//! ## Specifier Types
//!
//! - Relative: `./utils`, `../lib/foo`
//! - Absolute: `/abs/path/to/module`
//! - Bare: `lodash`, `@scope/pkg`, `font-awesome/css/font-awesome.css`
//!
//! ## Search order
//!
//! A `?query` or `#hash` suffix is dropped first. A target path is then tried
//! as an exact file, with each configured extension appended, and finally as
//! a directory (`package.json` main fields, then main files with each
//! extension). Bare specifiers are looked up in every `modules` directory
//! from the importer's directory upwards; absolute module directories are
//! searched directly.

use crate::config::ResolveConfig;
use rustc_hash::FxHashMap as HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

/// How deep `main` fields may chain into other directories.
const MAX_PACKAGE_DEPTH: usize = 4;

/// Error during resolution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Cannot resolve '{specifier}' from '{}': {message}", .from.display())]
pub struct ResolveError {
    pub specifier: String,
    pub from: PathBuf,
    pub message: String,
}

/// Import resolver. Results are cached per importer directory for the
/// lifetime of the resolver, which is one build pass.
#[derive(Debug)]
pub struct Resolver {
    config: ResolveConfig,
    cache: RwLock<HashMap<(PathBuf, String), Result<PathBuf, String>>>,
}

impl Resolver {
    #[must_use]
    pub fn new(config: ResolveConfig) -> Self {
        Self {
            config,
            cache: RwLock::new(HashMap::default()),
        }
    }

    /// Resolve `specifier` as written in the file `from`.
    pub fn resolve(&self, specifier: &str, from: &Path) -> Result<PathBuf, ResolveError> {
        let dir = from.parent().unwrap_or(Path::new(".")).to_path_buf();
        let key = (dir, specifier.to_string());

        let cached = self
            .cache
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&key)
            .cloned();
        let result = match cached {
            Some(result) => result,
            None => {
                let result = self.resolve_uncached(specifier, &key.0);
                self.cache
                    .write()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .insert(key, result.clone());
                result
            }
        };

        result.map_err(|message| ResolveError {
            specifier: specifier.to_string(),
            from: from.to_path_buf(),
            message,
        })
    }

    fn resolve_uncached(&self, specifier: &str, dir: &Path) -> Result<PathBuf, String> {
        let request = strip_query(specifier);
        if request.is_empty() {
            return Err("empty specifier".to_string());
        }

        if is_relative(request) {
            return self
                .resolve_file_or_directory(&dir.join(request), 0)
                .ok_or_else(|| "File not found".to_string());
        }

        if Path::new(request).is_absolute() {
            return self
                .resolve_file_or_directory(Path::new(request), 0)
                .ok_or_else(|| "File not found".to_string());
        }

        self.resolve_bare(request, dir)
    }

    /// Resolve a bare specifier against the module directories.
    fn resolve_bare(&self, request: &str, dir: &Path) -> Result<PathBuf, String> {
        for modules in &self.config.modules {
            if modules.is_absolute() {
                if let Some(found) = self.resolve_file_or_directory(&modules.join(request), 0) {
                    return Ok(found);
                }
                continue;
            }
            let mut current = Some(dir);
            while let Some(d) = current {
                let candidate = d.join(modules).join(request);
                if let Some(found) = self.resolve_file_or_directory(&candidate, 0) {
                    return Ok(found);
                }
                current = d.parent();
            }
        }

        let (package, _) = parse_bare_specifier(request);
        let dirs: Vec<String> = self
            .config
            .modules
            .iter()
            .map(|m| m.display().to_string())
            .collect();
        Err(format!(
            "Cannot find module '{package}' in {}",
            dirs.join(", ")
        ))
    }

    /// Resolve a path that might be a file or directory.
    fn resolve_file_or_directory(&self, target: &Path, depth: usize) -> Option<PathBuf> {
        if target.is_file() {
            return canonical(target);
        }

        for ext in &self.config.extensions {
            let with_ext = with_suffix(target, ext);
            if with_ext.is_file() {
                return canonical(&with_ext);
            }
        }

        if target.is_dir() {
            return self.resolve_directory(target, depth);
        }
        None
    }

    fn resolve_directory(&self, dir: &Path, depth: usize) -> Option<PathBuf> {
        if depth < MAX_PACKAGE_DEPTH {
            if let Some(main) = self.package_main(dir) {
                if let Some(found) = self.resolve_file_or_directory(&dir.join(main), depth + 1) {
                    return Some(found);
                }
            }
        }

        for main_file in &self.config.main_files {
            let base = dir.join(main_file);
            if base.is_file() {
                return canonical(&base);
            }
            for ext in &self.config.extensions {
                let candidate = with_suffix(&base, ext);
                if candidate.is_file() {
                    return canonical(&candidate);
                }
            }
        }
        None
    }

    /// The first configured main field of `dir/package.json` holding a string.
    fn package_main(&self, dir: &Path) -> Option<String> {
        let content = std::fs::read_to_string(dir.join("package.json")).ok()?;
        let json: serde_json::Value = serde_json::from_str(&content).ok()?;
        self.config
            .main_fields
            .iter()
            .find_map(|field| json.get(field).and_then(|v| v.as_str()))
            .filter(|main| !main.is_empty())
            .map(str::to_string)
    }
}

fn canonical(path: &Path) -> Option<PathBuf> {
    dunce::canonicalize(path).ok()
}

fn is_relative(request: &str) -> bool {
    request == "." || request == ".." || request.starts_with("./") || request.starts_with("../")
}

/// Drop a `?query` or `#hash` suffix (`font.eot?#iefix` -> `font.eot`).
#[must_use]
pub fn strip_query(specifier: &str) -> &str {
    match specifier.find(['?', '#']) {
        Some(i) => &specifier[..i],
        None => specifier,
    }
}

/// Split a bare specifier into package name and subpath.
#[must_use]
pub fn parse_bare_specifier(specifier: &str) -> (String, Option<String>) {
    if specifier.starts_with('@') {
        // Scoped package: @scope/pkg or @scope/pkg/subpath
        let parts: Vec<&str> = specifier.splitn(3, '/').collect();
        if parts.len() >= 2 {
            let pkg = format!("{}/{}", parts[0], parts[1]);
            (pkg, parts.get(2).map(|s| (*s).to_string()))
        } else {
            (specifier.to_string(), None)
        }
    } else {
        let mut parts = specifier.splitn(2, '/');
        let pkg = parts.next().unwrap_or_default().to_string();
        (pkg, parts.next().map(str::to_string))
    }
}

/// `path` with `suffix` appended to its last component, byte for byte.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn resolver() -> Resolver {
        Resolver::new(ResolveConfig::default())
    }

    fn touch(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_parse_bare_specifier() {
        assert_eq!(parse_bare_specifier("lodash"), ("lodash".into(), None));
        assert_eq!(
            parse_bare_specifier("lodash/get"),
            ("lodash".into(), Some("get".into()))
        );
        assert_eq!(parse_bare_specifier("@types/node"), ("@types/node".into(), None));
        assert_eq!(
            parse_bare_specifier("@babel/core/lib/parse"),
            ("@babel/core".into(), Some("lib/parse".into()))
        );
    }

    #[test]
    fn test_strip_query() {
        assert_eq!(strip_query("./font.eot?#iefix"), "./font.eot");
        assert_eq!(strip_query("./font.svg#icons"), "./font.svg");
        assert_eq!(strip_query("./a.js"), "./a.js");
    }

    #[test]
    fn test_resolve_relative_with_extension() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        touch(&src.join("index.js"), "require('./utils')");
        touch(&src.join("utils.js"), "");

        let found = resolver().resolve("./utils", &src.join("index.js")).unwrap();
        assert_eq!(found, dunce::canonicalize(src.join("utils.js")).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_extensions_appended_to_non_utf8_directories() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempdir().unwrap();
        let odd = dir.path().join(OsStr::from_bytes(b"caf\xe9"));
        if fs::create_dir_all(&odd).is_err() {
            // Some filesystems refuse names that are not valid UTF-8.
            return;
        }
        touch(&odd.join("util.js"), "");
        touch(&odd.join("index.js"), "");

        let found = resolver().resolve("./util", &odd.join("main.js")).unwrap();
        assert_eq!(found, dunce::canonicalize(odd.join("util.js")).unwrap());
        let index = resolver().resolve(".", &odd.join("main.js")).unwrap();
        assert_eq!(index, dunce::canonicalize(odd.join("index.js")).unwrap());
    }

    #[test]
    fn test_exact_file_wins_over_extension() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("data"), "");
        touch(&dir.path().join("data.js"), "");
        let found = resolver().resolve("./data", &dir.path().join("main.js")).unwrap();
        assert!(found.ends_with("data"));
    }

    #[test]
    fn test_directory_main_field_then_index() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("lib/package.json"), r#"{ "main": "./entry" }"#);
        touch(&dir.path().join("lib/entry.js"), "");
        touch(&dir.path().join("other/index.js"), "");
        let from = dir.path().join("main.js");

        assert!(resolver().resolve("./lib", &from).unwrap().ends_with("entry.js"));
        assert!(resolver().resolve("./other", &from).unwrap().ends_with("index.js"));
    }

    #[test]
    fn test_bare_walks_up_module_directories() {
        let dir = tempdir().unwrap();
        touch(
            &dir.path().join("node_modules/font-awesome/css/font-awesome.css"),
            "",
        );
        touch(&dir.path().join("node_modules/pkg/package.json"), r#"{ "main": "main.js" }"#);
        touch(&dir.path().join("node_modules/pkg/main.js"), "");
        let from = dir.path().join("src/deep/app.js");
        touch(&from, "");

        let css = resolver()
            .resolve("font-awesome/css/font-awesome.css", &from)
            .unwrap();
        assert!(css.ends_with("font-awesome.css"));
        assert!(resolver().resolve("pkg", &from).unwrap().ends_with("main.js"));
    }

    #[test]
    fn test_absolute_module_directory() {
        let dir = tempdir().unwrap();
        let shared = dir.path().join("shared");
        touch(&shared.join("widgets/button.js"), "");
        let config = ResolveConfig {
            modules: vec![PathBuf::from("node_modules"), shared.clone()],
            ..ResolveConfig::default()
        };
        let found = Resolver::new(config)
            .resolve("widgets/button", &dir.path().join("src/a.js"))
            .unwrap();
        assert!(found.ends_with("button.js"));
    }

    #[test]
    fn test_missing_module_error() {
        let dir = tempdir().unwrap();
        let err = resolver()
            .resolve("nope/sub", &dir.path().join("a.js"))
            .unwrap_err();
        assert_eq!(err.specifier, "nope/sub");
        assert!(err.message.contains("'nope'"));
    }

    #[test]
    fn test_results_are_cached() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("a.js"), "");
        let resolver = resolver();
        let from = dir.path().join("main.js");
        let first = resolver.resolve("./a", &from).unwrap();
        fs::remove_file(dir.path().join("a.js")).unwrap();
        assert_eq!(resolver.resolve("./a", &from).unwrap(), first);
    }
}
