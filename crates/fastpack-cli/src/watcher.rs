//! Source watching for `watch` and `serve`.
//!
//! A dedicated thread owns the `notify` watcher, debounces raw events for a
//! short window and hands each batch of changed paths to the coordinator.

use fastpack_core::DevHandle;
use miette::{IntoDiagnostic, Result};
use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Events closer together than this are delivered as one batch.
const DEBOUNCE: Duration = Duration::from_millis(50);

/// Start watching `root` recursively. Paths under any of `ignored` are
/// dropped, as are dot-files and `node_modules`.
pub fn spawn(root: PathBuf, ignored: Vec<PathBuf>, handle: DevHandle) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    let mut watcher = RecommendedWatcher::new(tx, Config::default()).into_diagnostic()?;
    watcher.watch(&root, RecursiveMode::Recursive).into_diagnostic()?;
    info!(root = %root.display(), "watching for changes");

    std::thread::Builder::new()
        .name("fastpack-watch".to_string())
        .spawn(move || {
            // The watcher stops when dropped.
            let _watcher = watcher;
            let mut batch: BTreeSet<PathBuf> = BTreeSet::new();
            loop {
                let timeout = if batch.is_empty() {
                    Duration::from_secs(3600)
                } else {
                    DEBOUNCE
                };
                match rx.recv_timeout(timeout) {
                    Ok(Ok(event)) => {
                        if is_relevant(&event) {
                            batch.extend(
                                event
                                    .paths
                                    .into_iter()
                                    .filter(|p| !should_ignore(&root, &ignored, p)),
                            );
                        }
                    }
                    Ok(Err(e)) => warn!(error = %e, "watch error"),
                    Err(RecvTimeoutError::Timeout) => {
                        if batch.is_empty() {
                            continue;
                        }
                        let changed: Vec<PathBuf> = std::mem::take(&mut batch).into_iter().collect();
                        for path in &changed {
                            debug!(path = %path.display(), "file changed");
                        }
                        info!(count = changed.len(), "change detected, rebuilding");
                        handle.notify_changed(changed);
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .into_diagnostic()?;
    Ok(())
}

fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(CreateKind::File | CreateKind::Any)
            | EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Name(_) | ModifyKind::Any)
            | EventKind::Remove(RemoveKind::File | RemoveKind::Any)
    )
}

fn should_ignore(root: &Path, ignored: &[PathBuf], path: &Path) -> bool {
    if ignored.iter().any(|dir| path.starts_with(dir)) {
        return true;
    }
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().any(|c| match c {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name.starts_with('.') || name == "node_modules"
        }
        _ => false,
    })
}
