//! Watch-mode build coordinator.
//!
//! A single task owns the build loop. It moves through
//! `Building → Serving → Building → …` and publishes its status, including
//! the last good [`BuildSnapshot`], on a `tokio::sync::watch` channel. The
//! HTTP layer and the disk writer only ever read that channel.
//!
//! Change notifications that arrive while a pass is running are folded into
//! one pending set, and exactly one follow-up pass runs for all of them.

use crate::build::{BuildOutput, CancelSource, CancelToken, Compiler};
use crate::emit::BundleSummary;
use crate::error::{BuildReport, Error};
use fastpack_util::fs::normalize_slashes;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum DevState {
    /// No pass has produced output yet and none is running.
    Idle,
    Building { generation: u64 },
    Serving { generation: u64 },
    Stopped,
}

impl DevState {
    #[must_use]
    pub fn is_building(self) -> bool {
        matches!(self, Self::Building { .. })
    }
}

/// The output of the last successful pass, held in memory.
#[derive(Debug, Default)]
pub struct BuildSnapshot {
    pub generation: u64,
    /// Keyed by path relative to the output directory, `/`-separated.
    files: BTreeMap<String, Arc<[u8]>>,
    pub bundles: Vec<BundleSummary>,
}

impl BuildSnapshot {
    #[must_use]
    pub fn from_output(output: &BuildOutput) -> Self {
        Self {
            generation: output.generation,
            files: output
                .artifacts
                .iter()
                .map(|a| (normalize_slashes(&a.path), Arc::clone(&a.contents)))
                .collect(),
            bundles: output.bundles.clone(),
        }
    }

    /// Look up a file by its output-relative path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<Arc<[u8]>> {
        self.files.get(path.trim_start_matches('/')).cloned()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }
}

/// Everything the coordinator publishes.
#[derive(Debug, Clone, Serialize)]
pub struct DevStatus {
    #[serde(flatten)]
    pub state: DevState,
    /// Completed passes, including failed ones.
    pub passes: u64,
    /// Change notifications folded into the pending follow-up pass.
    pub coalesced: u64,
    #[serde(skip)]
    pub snapshot: Option<Arc<BuildSnapshot>>,
    /// Diagnostics of the most recent completed pass.
    pub last_report: BuildReport,
    /// Set when the most recent pass could not run at all.
    pub last_error: Option<String>,
}

impl DevStatus {
    fn initial() -> Self {
        Self {
            state: DevState::Building { generation: 0 },
            passes: 0,
            coalesced: 0,
            snapshot: None,
            last_report: BuildReport::new(),
            last_error: None,
        }
    }
}

/// One build pass as the coordinator sees it.
pub trait PassRunner: Send + Sync + 'static {
    /// Run a pass after `changed` files were modified. The first pass gets an
    /// empty list.
    fn run(&self, changed: &[PathBuf], cancel: &CancelToken) -> Result<BuildOutput, Error>;

    /// Called with every pass that finished without diagnostics.
    fn persist(&self, _output: &BuildOutput) -> Result<(), BuildReport> {
        Ok(())
    }
}

impl PassRunner for Compiler {
    fn run(&self, changed: &[PathBuf], cancel: &CancelToken) -> Result<BuildOutput, Error> {
        self.invalidate(changed);
        Compiler::run(self, cancel)
    }
}

/// A compiler that also writes each good pass to the output directory.
#[derive(Debug)]
pub struct WritingCompiler(pub Compiler);

impl PassRunner for WritingCompiler {
    fn run(&self, changed: &[PathBuf], cancel: &CancelToken) -> Result<BuildOutput, Error> {
        PassRunner::run(&self.0, changed, cancel)
    }

    fn persist(&self, output: &BuildOutput) -> Result<(), BuildReport> {
        self.0.write(output).map(|_| ())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DevOptions {
    /// Abandon the running pass as soon as a change arrives.
    pub cancel_on_change: bool,
}

impl Default for DevOptions {
    fn default() -> Self {
        Self {
            cancel_on_change: true,
        }
    }
}

#[derive(Debug)]
enum Command {
    Changed(Vec<PathBuf>),
    Stop,
}

/// Cloneable handle to a running coordinator.
#[derive(Debug, Clone)]
pub struct DevHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<DevStatus>,
}

impl DevHandle {
    /// Report changed files. Ignored once the coordinator has stopped.
    pub fn notify_changed(&self, paths: Vec<PathBuf>) {
        let _ = self.commands.send(Command::Changed(paths));
    }

    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    #[must_use]
    pub fn status(&self) -> DevStatus {
        self.status.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DevStatus> {
        self.status.clone()
    }

    /// Wait until no pass is running and return the last good snapshot.
    pub async fn wait_ready(&self) -> Option<Arc<BuildSnapshot>> {
        let mut rx = self.status.clone();
        let snapshot = match rx.wait_for(|s| !s.state.is_building()).await {
            Ok(status) => status.snapshot.clone(),
            Err(_) => None,
        };
        snapshot
    }
}

/// The build loop task.
pub struct DevCoordinator<R: PassRunner> {
    runner: Arc<R>,
    options: DevOptions,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<DevStatus>,
    cancel: CancelSource,
}

impl<R: PassRunner> DevCoordinator<R> {
    /// Start the coordinator on the current tokio runtime. The first pass
    /// begins immediately.
    pub fn spawn(runner: Arc<R>, options: DevOptions) -> (DevHandle, JoinHandle<()>) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(DevStatus::initial());
        let coordinator = Self {
            runner,
            options,
            commands,
            status,
            cancel: CancelSource::new(),
        };
        let task = tokio::spawn(coordinator.run_loop());
        (
            DevHandle {
                commands: commands_tx,
                status: status_rx,
            },
            task,
        )
    }

    async fn run_loop(mut self) {
        let mut pending: Option<BTreeSet<PathBuf>> = Some(BTreeSet::new());

        loop {
            if let Some(changed) = pending.take() {
                match self.pass(changed).await {
                    PassEnd::Stop => break,
                    PassEnd::Next(next) => pending = next,
                }
                continue;
            }

            match self.commands.recv().await {
                Some(Command::Changed(paths)) => {
                    pending = Some(paths.into_iter().collect());
                }
                Some(Command::Stop) | None => break,
            }
        }

        self.cancel.cancel();
        self.status.send_modify(|s| s.state = DevState::Stopped);
        info!("dev coordinator stopped");
    }

    /// Run one pass, collecting changes that arrive meanwhile.
    async fn pass(&mut self, changed: BTreeSet<PathBuf>) -> PassEnd {
        let token = self.cancel.next();
        let generation = token.generation();
        self.status.send_modify(|s| {
            s.state = DevState::Building { generation };
            s.coalesced = 0;
        });
        info!(generation, changed = changed.len(), "build started");

        let runner = Arc::clone(&self.runner);
        let pass_token = token.clone();
        let changed: Vec<PathBuf> = changed.into_iter().collect();
        let mut task = tokio::task::spawn_blocking(move || runner.run(&changed, &pass_token));

        let mut dirty: BTreeSet<PathBuf> = BTreeSet::new();
        let mut got_change = false;
        let mut stopping = false;

        let joined = loop {
            tokio::select! {
                joined = &mut task => break joined,
                command = self.commands.recv(), if !stopping => match command {
                    Some(Command::Changed(paths)) => {
                        got_change = true;
                        dirty.extend(paths);
                        self.status.send_modify(|s| s.coalesced += 1);
                        if self.options.cancel_on_change {
                            self.cancel.cancel();
                        }
                    }
                    Some(Command::Stop) | None => {
                        stopping = true;
                        self.cancel.cancel();
                    }
                },
            }
        };

        if stopping {
            return PassEnd::Stop;
        }

        match joined {
            Ok(Ok(_)) | Ok(Err(Error::Cancelled { .. })) if token.is_cancelled() => {
                debug!(generation, "build pass superseded");
            }
            Ok(Ok(output)) => self.finish(output),
            Ok(Err(e)) => {
                error!(generation, error = %e, "build pass failed");
                let (report, message) = match e {
                    Error::Build(report) => (report, None),
                    other => (BuildReport::new(), Some(other.to_string())),
                };
                self.status.send_modify(|s| {
                    s.passes += 1;
                    s.last_report = report;
                    s.last_error = message;
                    s.state = serving_or_idle(s.snapshot.as_deref());
                });
            }
            Err(join_error) => {
                error!(generation, error = %join_error, "build task panicked");
                self.status.send_modify(|s| {
                    s.passes += 1;
                    s.last_error = Some(join_error.to_string());
                    s.state = serving_or_idle(s.snapshot.as_deref());
                });
            }
        }

        PassEnd::Next(got_change.then_some(dirty))
    }

    fn finish(&self, output: BuildOutput) {
        let generation = output.generation;
        let mut report = output.report.clone();
        let good = report.is_empty();
        if good {
            if let Err(write_report) = self.runner.persist(&output) {
                report.extend(write_report.diagnostics);
            }
        }

        if good {
            info!(generation, modules = output.modules, duration_ms = output.duration_ms, "build succeeded");
        } else {
            warn!(generation, errors = report.len(), "build finished with errors; keeping last good output");
            for diagnostic in &report.diagnostics {
                warn!("{diagnostic}");
            }
        }

        let snapshot = good.then(|| Arc::new(BuildSnapshot::from_output(&output)));
        self.status.send_modify(|s| {
            s.passes += 1;
            s.last_report = report;
            s.last_error = None;
            if let Some(snapshot) = snapshot {
                s.snapshot = Some(snapshot);
            }
            s.state = serving_or_idle(s.snapshot.as_deref());
        });
    }
}

enum PassEnd {
    Stop,
    Next(Option<BTreeSet<PathBuf>>),
}

fn serving_or_idle(snapshot: Option<&BuildSnapshot>) -> DevState {
    match snapshot {
        Some(s) => DevState::Serving {
            generation: s.generation,
        },
        None => DevState::Idle,
    }
}
