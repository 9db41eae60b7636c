//! External program stage.
//!
//! Pipes module content through a program's stdin and takes its stdout as the
//! new content. This is the adapter for compilers that live outside the
//! process. A `[path]` argument is replaced with the module path.

use crate::transform::registry::parse_options;
use crate::transform::{Stage, StageContext, StageError, StageInput, StageOutput};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

pub const ID: &str = "command";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CommandOptions {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct CommandStage {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl Stage for CommandStage {
    fn transform(
        &self,
        input: StageInput<'_>,
        ctx: &mut StageContext<'_>,
    ) -> Result<StageOutput, StageError> {
        let path = ctx.path().display().to_string();
        let args: Vec<String> = self.args.iter().map(|a| a.replace("[path]", &path)).collect();

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = ctx.path().parent() {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| StageError::failed(format!("failed to spawn `{}`: {e}", self.program)))?;

        // Feed stdin from another thread so a full stdout pipe cannot block us.
        let stdin = child.stdin.take();
        let content = input.content;
        let writer = std::thread::spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(content.as_bytes())?;
            }
            Ok(())
        });

        let output = child
            .wait_with_output()
            .map_err(|e| StageError::failed(format!("`{}` did not finish: {e}", self.program)))?;
        let write_result = writer
            .join()
            .map_err(|_| StageError::failed("stdin writer panicked"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StageError::failed(format!(
                "`{}` exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        // A program may exit successfully without reading all of stdin.
        if let Err(e) = write_result {
            tracing::debug!(program = %self.program, error = %e, "stdin closed early");
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|_| StageError::failed(format!("`{}` wrote non-UTF-8 output", self.program)))?;
        Ok(StageOutput::content(stdout))
    }
}

pub fn create(options: &Value, _shared: &Map<String, Value>) -> Result<Arc<dyn Stage>, String> {
    let options: CommandOptions = parse_options(options)?;
    if options.program.is_empty() {
        return Err("`program` is required".to_string());
    }
    Ok(Arc::new(CommandStage {
        program: options.program,
        args: options.args,
        env: options.env,
    }))
}

#[cfg(all(test, unix))]
mod tests {
    use crate::transform::stages::test_support::run_one;
    use serde_json::{json, Value};

    #[test]
    fn test_pipes_through_program() {
        let outcome = run_one(
            "command",
            json!({ "program": "tr", "args": ["a-z", "A-Z"] }),
            "/tmp/x.txt",
            "hello",
        )
        .unwrap();
        assert_eq!(outcome.content, "HELLO");
    }

    #[test]
    fn test_path_argument_substitution() {
        let outcome = run_one(
            "command",
            json!({ "program": "echo", "args": ["[path]"] }),
            "/tmp/x.txt",
            "",
        )
        .unwrap();
        assert_eq!(outcome.content.trim(), "/tmp/x.txt");
    }

    #[test]
    fn test_nonzero_exit_fails_with_stderr() {
        let err = run_one(
            "command",
            json!({ "program": "sh", "args": ["-c", "echo broken >&2; exit 3"] }),
            "/tmp/x.txt",
            "",
        )
        .unwrap_err();
        assert!(err.contains("broken"), "{err}");
    }

    #[test]
    fn test_missing_program_option() {
        assert!(run_one("command", Value::Null, "/tmp/x.txt", "").is_err());
    }
}
