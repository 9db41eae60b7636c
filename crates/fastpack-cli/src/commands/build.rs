//! `fastpack build` command implementation.

use super::config_failure;
use crate::load_config;
use fastpack_core::version::SCHEMA_VERSION;
use fastpack_core::{BuildOutput, BundleSummary, Compiler, Diagnostic, Error};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::Path;

/// Build result for `--json` output.
#[derive(Serialize)]
struct BuildResultJson<'a> {
    schema_version: u32,
    ok: bool,
    output_dir: String,
    bundles: &'a [BundleSummary],
    modules: usize,
    assets: usize,
    duration_ms: u64,
    diagnostics: &'a [Diagnostic],
    notes: Vec<String>,
}

/// Run the build command.
pub fn run(cwd: &Path, config_path: Option<&Path>, out_dir: Option<&Path>, json: bool) -> Result<()> {
    let mut config = load_config(cwd, config_path).unwrap_or_else(|e| config_failure(&e, json));
    if let Some(dir) = out_dir {
        config.output.path = cwd.join(dir);
    }
    let output_dir = config.output_dir();
    let compiler = Compiler::new(config).unwrap_or_else(|e| config_failure(&e, json));

    let output = match compiler.build() {
        Ok(output) => output,
        Err(Error::Config(e)) => config_failure(&e, json),
        Err(e) => return Err(e).into_diagnostic(),
    };

    if json {
        print_json(&output, &output_dir);
        if !output.is_success() {
            std::process::exit(1);
        }
        return Ok(());
    }

    for bundle in &output.bundles {
        let style = bundle
            .style
            .as_deref()
            .map(|s| format!(" + {s}"))
            .unwrap_or_default();
        println!(
            "  {} -> {}{} ({} modules)",
            bundle.name, bundle.script, style, bundle.modules
        );
    }
    println!(
        "built {} module(s), {} asset(s) into {} in {}ms",
        output.modules,
        output.assets,
        output_dir.display(),
        output.duration_ms
    );

    if output.is_success() {
        Ok(())
    } else {
        Err(Error::Build(output.report)).into_diagnostic()
    }
}

fn print_json(output: &BuildOutput, output_dir: &Path) {
    let result = BuildResultJson {
        schema_version: SCHEMA_VERSION,
        ok: output.is_success(),
        output_dir: output_dir.display().to_string(),
        bundles: &output.bundles,
        modules: output.modules,
        assets: output.assets,
        duration_ms: output.duration_ms,
        diagnostics: &output.report.diagnostics,
        notes: Vec::new(),
    };
    println!("{}", serde_json::to_string(&result).unwrap_or_default());
}
