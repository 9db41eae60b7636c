//! `fastpack watch`: rebuild to disk on every change.

use super::config_failure;
use crate::{load_config, watcher};
use fastpack_core::dev::WritingCompiler;
use fastpack_core::{Compiler, DevCoordinator, DevOptions, DevState, DevStatus};
use miette::{IntoDiagnostic, Result};
use std::path::Path;
use std::sync::Arc;

pub fn run(cwd: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(cwd, config_path).unwrap_or_else(|e| config_failure(&e, false));
    let root = config.root.clone();
    let output_dir = config.output_dir();
    let compiler = Compiler::new(config).unwrap_or_else(|e| config_failure(&e, false));

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    runtime.block_on(async move {
        let (handle, task) =
            DevCoordinator::spawn(Arc::new(WritingCompiler(compiler)), DevOptions::default());
        watcher::spawn(root, vec![output_dir.clone()], handle.clone())?;
        println!("watching; output in {} (Ctrl+C to stop)", output_dir.display());

        let mut status = handle.subscribe();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut reported = 0;
        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    handle.stop();
                    break;
                }
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = status.borrow_and_update().clone();
                    if current.passes != reported {
                        reported = current.passes;
                        print_pass(&current);
                    }
                    if current.state == DevState::Stopped {
                        break;
                    }
                }
            }
        }
        task.await.into_diagnostic()
    })
}

fn print_pass(status: &DevStatus) {
    if let Some(error) = &status.last_error {
        eprintln!("error: {error}");
    } else if status.last_report.is_empty() {
        if let DevState::Serving { generation } = status.state {
            println!("build {generation} ok");
        }
    } else {
        eprint!("{}", status.last_report);
    }
}
