//! Integration tests for `fastpack rules`.

use serial_test::serial;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

fn cargo_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.args(["run", "-q", "-p", "fastpack-cli", "--bin", "fastpack", "--"]);
    cmd
}

const CONFIG: &str = r#"{
    "entry": "src/main.js",
    "rules": [
        { "test": "\\.js$", "exclude": { "pattern": "node_modules[\\\\/]", "except": ["fable-"] }, "use": "script" },
        { "test": "\\.css$", "use": ["css", "style-inject"] }
    ]
}"#;

fn rules_json(args: &[&str]) -> serde_json::Value {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("fastpack.json"), CONFIG).unwrap();
    let output = cargo_bin()
        .args(["rules", "--json", "--cwd"])
        .arg(dir.path())
        .args(args)
        .output()
        .expect("failed to run fastpack rules");
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

#[test]
#[serial]
fn test_rules_lists_stages_in_order() {
    let json = rules_json(&["src/app.css"]);
    assert_eq!(json["stages"], serde_json::json!(["css", "style-inject"]));
    assert_eq!(json["rules"][1]["verdict"], "matched");
    assert_eq!(json["rules"][0]["verdict"], "no_match");
}

#[test]
#[serial]
fn test_rules_override_beats_exclusion() {
    let json = rules_json(&["node_modules/fable-core/index.js"]);
    assert_eq!(json["stages"], serde_json::json!(["script"]));
    assert_eq!(json["rules"][0]["verdict"], "overridden");

    let json = rules_json(&["node_modules/left-pad/index.js"]);
    assert_eq!(json["rules"][0]["verdict"], "excluded");
    assert_eq!(json["pass_through"], true);
}

#[test]
#[serial]
fn test_version_prints_name() {
    let output = cargo_bin().arg("version").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("fastpack "));
}
