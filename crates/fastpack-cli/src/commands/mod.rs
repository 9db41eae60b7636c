pub mod build;
pub mod rules;
pub mod serve;
pub mod version;
pub mod watch;

use crate::config_hint;
use fastpack_core::version::SCHEMA_VERSION;
use fastpack_core::ConfigError;
use serde::Serialize;

#[derive(Serialize)]
pub(crate) struct ErrorJson {
    pub code: &'static str,
    pub message: String,
}

/// Failure result for `--json` output.
#[derive(Serialize)]
pub(crate) struct ErrorResult {
    pub schema_version: u32,
    pub ok: bool,
    pub error: ErrorJson,
    pub notes: Vec<String>,
}

/// Report a configuration error and exit with status 1.
pub(crate) fn config_failure(err: &ConfigError, json: bool) -> ! {
    let hint = config_hint(err);
    if json {
        let result = ErrorResult {
            schema_version: SCHEMA_VERSION,
            ok: false,
            error: ErrorJson {
                code: "CONFIG_INVALID",
                message: err.to_string(),
            },
            notes: hint.into_iter().map(|h| format!("hint: {h}")).collect(),
        };
        println!("{}", serde_json::to_string(&result).unwrap_or_default());
    } else {
        eprintln!("error: {err}");
        if let Some(hint) = hint {
            eprintln!("hint: {hint}");
        }
    }
    std::process::exit(1);
}
