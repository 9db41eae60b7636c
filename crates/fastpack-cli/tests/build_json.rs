//! Integration tests for `fastpack build`.

use serial_test::serial;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::tempdir;

fn cargo_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.args(["run", "-q", "-p", "fastpack-cli", "--bin", "fastpack", "--"]);
    cmd
}

fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (name, contents) in files {
        let path = root.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
}

fn build_json(root: &Path, extra: &[&str]) -> (Output, serde_json::Value) {
    let output = cargo_bin()
        .args(["build", "--json", "--cwd"])
        .arg(root)
        .args(extra)
        .output()
        .expect("failed to run fastpack build");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json = serde_json::from_str(stdout.trim()).unwrap_or_else(|e| {
        panic!(
            "stdout should be one JSON object ({e}): {stdout}\nstderr: {}",
            String::from_utf8_lossy(&output.stderr)
        )
    });
    (output, json)
}

#[test]
#[serial]
fn test_build_extracts_styles_into_separate_bundle() {
    let dir = tempdir().unwrap();
    write_files(
        dir.path(),
        &[
            (
                "fastpack.json",
                r#"{
                    "entry": "src/main.js",
                    "output": { "path": "public", "filename": "bundle.js" },
                    "rules": [{ "test": "\\.css$", "use": ["css", "extract-style"] }]
                }"#,
            ),
            ("src/main.js", "require('./app.css');\nconsole.log(require('./msg'));\n"),
            ("src/msg.js", "module.exports = 'hello';\n"),
            ("src/app.css", "body { margin: 0; }\n"),
        ],
    );

    let (output, json) = build_json(dir.path(), &[]);
    assert!(output.status.success(), "{json}");
    assert_eq!(json["ok"], true);
    assert_eq!(json["schema_version"], 1);
    assert_eq!(json["bundles"][0]["script"], "bundle.js");
    assert_eq!(json["bundles"][0]["style"], "styles.css");
    assert!(json["notes"].is_array());

    let js = fs::read_to_string(dir.path().join("public/bundle.js")).unwrap();
    assert!(js.contains("module.exports = 'hello';"));
    assert!(!js.contains("margin"));
    assert!(js.ends_with("//# sourceMappingURL=bundle.js.map\n"));
    let css = fs::read_to_string(dir.path().join("public/styles.css")).unwrap();
    assert!(css.contains("margin"));
    assert!(dir.path().join("public/bundle.js.map").exists());
    assert!(dir.path().join("public/styles.css.map").exists());
}

#[test]
#[serial]
fn test_build_reports_unresolved_import() {
    let dir = tempdir().unwrap();
    write_files(
        dir.path(),
        &[
            ("fastpack.json", r#"{ "entry": "main.js" }"#),
            ("main.js", "require('./nope');\n"),
        ],
    );

    let (output, json) = build_json(dir.path(), &[]);
    assert!(!output.status.success());
    assert_eq!(json["ok"], false);
    let diagnostics = json["diagnostics"].as_array().unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0]["code"], "RESOLVE_FAILED");
    assert_eq!(diagnostics[0]["context"], "./nope");
    assert!(!dir.path().join("dist/main.js").exists());
}

#[test]
#[serial]
fn test_build_without_config_is_config_error() {
    let dir = tempdir().unwrap();
    let (output, json) = build_json(dir.path(), &[]);
    assert!(!output.status.success());
    assert_eq!(json["ok"], false);
    assert_eq!(json["error"]["code"], "CONFIG_INVALID");
    let code = json["error"]["code"].as_str().unwrap();
    assert!(code.chars().all(|c| c.is_ascii_uppercase() || c == '_'));
    assert!(json["notes"][0].as_str().unwrap().starts_with("hint:"));
}

#[test]
#[serial]
fn test_build_out_dir_override() {
    let dir = tempdir().unwrap();
    write_files(
        dir.path(),
        &[
            ("fastpack.json", r#"{ "entry": "main.js", "devtool": "none" }"#),
            ("main.js", "exports.x = 1;\n"),
        ],
    );
    let (output, _) = build_json(dir.path(), &["--out-dir", "elsewhere"]);
    assert!(output.status.success());
    assert!(dir.path().join("elsewhere/main.js").exists());
    assert!(!dir.path().join("dist").exists());
}

#[test]
#[serial]
fn test_unknown_stage_is_reported_before_building() {
    let dir = tempdir().unwrap();
    write_files(
        dir.path(),
        &[
            (
                "fastpack.json",
                r#"{ "entry": "main.js", "rules": [{ "test": "\\.js$", "use": "babel" }] }"#,
            ),
            ("main.js", ""),
        ],
    );
    let (output, json) = build_json(dir.path(), &[]);
    assert!(!output.status.success());
    assert!(json["error"]["message"].as_str().unwrap().contains("babel"));
    assert!(!dir.path().join("dist").exists());
}
