//! The build state machine: mount, install, start, ready.
//!
//! One [`BuildPipeline`] drives one run. Every phase is bounded by
//! [`PhaseLimits`](crate::PhaseLimits) and aborts promptly when the run's
//! cancellation token fires; processes spawned by the run are killed on the
//! way out.

use crate::config::OrchestratorConfig;
use crate::detect::Manifest;
use crate::error::{BuildError, MountError};
use crate::limits::bounded;
use crate::logs::LogStream;
use crate::mount::{build_mount_tree, merge_files};
use crate::preview::instrument_entry;
use crate::run::{PhaseTracker, RunId};
use crate::runtime::SandboxRuntime;
use crate::skeleton::skeleton_files;
use crate::types::{CommandSpec, ServerReady, SpawnedProcess};
use previewkit_common::{
    BuildFailure, BuildPhase, FailureKind, FileRecord, LogSource, OrchestratorEvent,
    ProjectClassification,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

/// How long to wait for buffered output after a process exits
const OUTPUT_FLUSH: Duration = Duration::from_secs(2);

/// A server that signalled readiness. Dropping it kills the server.
pub struct ReadyPreview {
    ready: ServerReady,
    strategy: String,
    process: SpawnedProcess,
}

impl ReadyPreview {
    pub fn url(&self) -> &str {
        &self.ready.url
    }

    pub fn port(&self) -> u16 {
        self.ready.port
    }

    /// Name of the start strategy that produced the server
    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn server(&self) -> &ServerReady {
        &self.ready
    }
}

impl std::fmt::Debug for ReadyPreview {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyPreview")
            .field("ready", &self.ready)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

/// Result of one run
#[derive(Debug)]
pub enum BuildOutcome {
    Ready(ReadyPreview),
    Failed(BuildFailure),
}

impl BuildOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, BuildOutcome::Ready(_))
    }

    pub fn failure(&self) -> Option<&BuildFailure> {
        match self {
            BuildOutcome::Failed(failure) => Some(failure),
            BuildOutcome::Ready(_) => None,
        }
    }
}

/// Drives one build run against a booted runtime
pub struct BuildPipeline {
    run_id: RunId,
    runtime: Arc<dyn SandboxRuntime>,
    config: Arc<OrchestratorConfig>,
    logs: LogStream,
    cancel: CancellationToken,
    tracker: PhaseTracker,
    events: Option<broadcast::Sender<OrchestratorEvent>>,
}

impl BuildPipeline {
    pub fn new(
        runtime: Arc<dyn SandboxRuntime>,
        config: Arc<OrchestratorConfig>,
        logs: LogStream,
        cancel: CancellationToken,
    ) -> Self {
        let run_id = RunId::new();
        Self {
            run_id,
            runtime,
            config,
            logs,
            cancel,
            tracker: PhaseTracker::new(run_id),
            events: None,
        }
    }

    /// Use a caller-assigned run id
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self.tracker = PhaseTracker::new(run_id);
        self
    }

    /// Publish phase changes as orchestrator events
    pub fn with_events(mut self, events: broadcast::Sender<OrchestratorEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn phase(&self) -> BuildPhase {
        self.tracker.current()
    }

    /// Every phase this run has entered, starting with `Idle`
    pub fn history(&self) -> &[BuildPhase] {
        self.tracker.history()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<BuildPhase> {
        self.tracker.subscribe()
    }

    pub fn logs(&self) -> &LogStream {
        &self.logs
    }

    /// Run the pipeline to `Ready` or `Error`
    pub async fn run(
        &mut self,
        files: &[FileRecord],
        classification: &ProjectClassification,
    ) -> BuildOutcome {
        tracing::info!(
            run_id = %self.run_id,
            runtime = self.runtime.name(),
            files = files.len(),
            classification = %classification,
            "starting build run"
        );

        match self.drive(files, classification).await {
            Ok(ready) => BuildOutcome::Ready(ready),
            Err(err) => BuildOutcome::Failed(self.fail(err)),
        }
    }

    /// Keep a ready server alive until the run is cancelled, then kill it.
    ///
    /// Returns the exit code if the server stopped on its own first.
    pub async fn hold(&self, mut preview: ReadyPreview) -> Option<i32> {
        tokio::select! {
            _ = self.cancel.cancelled() => {
                tracing::debug!(run_id = %self.run_id, "stopping preview server");
                preview.process.kill();
                None
            }
            code = preview.process.wait() => {
                tracing::warn!(run_id = %self.run_id, exit_code = code, "preview server exited");
                self.logs.system(format!("preview server exited with code {}", code));
                Some(code)
            }
        }
    }

    async fn drive(
        &mut self,
        files: &[FileRecord],
        classification: &ProjectClassification,
    ) -> Result<ReadyPreview, BuildError> {
        let working_dir = classification
            .working_dir()
            .ok_or(BuildError::UnsupportedProjectType)?
            .to_string();
        let mut files = files.to_vec();

        self.enter(BuildPhase::Mounting);
        self.mount(&files, &working_dir).await?;

        if classification.needs_install() {
            self.enter(BuildPhase::Installing);
            self.install(&mut files, &working_dir).await?;
        }

        self.enter(BuildPhase::Starting);
        let ready = self.start(&files, classification, &working_dir).await?;

        self.enter(BuildPhase::Ready);
        tracing::info!(
            run_id = %self.run_id,
            url = %ready.url(),
            strategy = ready.strategy(),
            "preview ready"
        );
        Ok(ready)
    }

    fn enter(&mut self, phase: BuildPhase) {
        if self.tracker.advance(phase) {
            if let Some(events) = &self.events {
                let _ = events.send(OrchestratorEvent::PhaseChanged {
                    run_id: self.run_id.0,
                    phase,
                });
            }
        }
    }

    fn fail(&mut self, err: BuildError) -> BuildFailure {
        let phase_reached = self.tracker.phase_reached();
        let kind = err.kind();
        if kind == FailureKind::Cancelled {
            tracing::info!(run_id = %self.run_id, phase = %phase_reached, "build run cancelled");
        } else {
            tracing::error!(run_id = %self.run_id, phase = %phase_reached, error = %err, "build run failed");
        }
        self.logs.system(format!("error: {}", err));
        self.enter(BuildPhase::Error);

        BuildFailure {
            kind,
            message: err.to_string(),
            phase_reached,
            logs: self.logs.snapshot(),
        }
    }

    /// Await `fut` under the run's cancellation token and a phase limit
    async fn guarded<F: Future>(
        &self,
        phase: BuildPhase,
        limit: Option<Duration>,
        fut: F,
    ) -> Result<F::Output, BuildError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BuildError::Cancelled),
            result = bounded(limit, fut) => result.map_err(|_| BuildError::Timeout {
                phase,
                after: limit.unwrap_or_default(),
            }),
        }
    }

    /// Mount `files` with the served entry document instrumented
    async fn mount(&self, files: &[FileRecord], working_dir: &str) -> Result<(), BuildError> {
        let files = instrument_entry(files, working_dir, self.config.preview.text_preview_chars);
        let tree = build_mount_tree(&files)?;
        let phase = self.tracker.current();
        self.guarded(phase, self.config.limits.mount_timeout, self.runtime.mount(&tree))
            .await?
            .map_err(|e| MountError::Runtime(e.to_string()))?;

        tracing::debug!(run_id = %self.run_id, files = tree.leaf_count(), "file tree mounted");
        self.logs.system(format!("mounted {} files", tree.leaf_count()));
        Ok(())
    }

    async fn install(&self, files: &mut Vec<FileRecord>, working_dir: &str) -> Result<(), BuildError> {
        let exit_code = self.install_attempt(working_dir).await?;
        if exit_code == 0 {
            return Ok(());
        }

        let (framework, skeleton) = skeleton_files(files, working_dir);
        tracing::warn!(
            run_id = %self.run_id,
            exit_code,
            framework = framework.name(),
            "install failed, retrying with skeleton manifest"
        );
        self.logs.system(format!(
            "install exited with code {}; rewriting manifest to a minimal {} project and retrying",
            exit_code,
            framework.name()
        ));

        *files = merge_files(files, &skeleton);
        self.mount(files, working_dir).await?;

        match self.install_attempt(working_dir).await? {
            0 => Ok(()),
            exit_code => Err(BuildError::InstallFailure { exit_code }),
        }
    }

    /// One install invocation; a command that cannot spawn counts as a failed attempt
    async fn install_attempt(&self, working_dir: &str) -> Result<i32, BuildError> {
        let command = self.config.install.clone().in_dir(working_dir);
        self.logs.system(format!("$ {}", command.display()));

        let mut process = match self.runtime.spawn(&command).await {
            Ok(process) => process,
            Err(e) => {
                tracing::warn!(run_id = %self.run_id, error = %e, "install command failed to spawn");
                self.logs.system(format!("install could not start: {}", e));
                return Ok(-1);
            }
        };

        let pump = tokio::spawn(pump_lines(process.take_output(), self.logs.clone(), LogSource::Install));
        let limit = self.config.limits.install_timeout;
        let exit_code = match self.guarded(BuildPhase::Installing, limit, process.wait()).await {
            Ok(code) => code,
            Err(e) => {
                process.kill();
                return Err(e);
            }
        };

        let _ = tokio::time::timeout(OUTPUT_FLUSH, pump).await;
        tracing::debug!(run_id = %self.run_id, exit_code, "install finished");
        Ok(exit_code)
    }

    fn start_candidates(
        &self,
        files: &[FileRecord],
        classification: &ProjectClassification,
        working_dir: &str,
    ) -> Vec<(String, CommandSpec)> {
        if *classification == ProjectClassification::Static {
            let command = self.config.start.static_server.clone().in_dir(working_dir);
            return vec![("static-server".to_string(), command)];
        }

        let manifest = Manifest::find(files, working_dir, &self.config.detector.manifest_name);
        self.config
            .start
            .strategies
            .iter()
            .filter_map(|strategy| match strategy.precondition_failure(manifest.as_ref()) {
                Some(reason) => {
                    tracing::debug!(run_id = %self.run_id, strategy = %strategy.name, %reason, "skipping start strategy");
                    self.logs.system(format!("skipping {}: {}", strategy.name, reason));
                    None
                }
                None => Some((strategy.name.clone(), strategy.command(working_dir))),
            })
            .collect()
    }

    async fn start(
        &self,
        files: &[FileRecord],
        classification: &ProjectClassification,
        working_dir: &str,
    ) -> Result<ReadyPreview, BuildError> {
        // subscribe before spawning so an early announcement is not missed
        let mut ready_rx = self.runtime.subscribe_ready();
        let mut failures = Vec::new();

        for (name, command) in self.start_candidates(files, classification, working_dir) {
            if self.cancel.is_cancelled() {
                return Err(BuildError::Cancelled);
            }
            self.logs.system(format!("starting with {}: $ {}", name, command.display()));

            match self.runtime.spawn(&command).await {
                Ok(process) => return self.await_ready(name, process, &mut ready_rx).await,
                Err(e) => {
                    tracing::warn!(run_id = %self.run_id, strategy = %name, error = %e, "start strategy failed");
                    self.logs.system(format!("{} failed to start: {}", name, e));
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }

        if failures.is_empty() {
            return Err(BuildError::StartFailure("no start strategy applies".to_string()));
        }
        Err(BuildError::StartFailure(failures.join("; ")))
    }

    async fn await_ready(
        &self,
        strategy: String,
        mut process: SpawnedProcess,
        ready_rx: &mut broadcast::Receiver<ServerReady>,
    ) -> Result<ReadyPreview, BuildError> {
        tokio::spawn(pump_lines(process.take_output(), self.logs.clone(), LogSource::Start));

        let logs = &self.logs;
        let name = strategy.as_str();
        let process_ref = &mut process;
        let wait = async move {
            let mut exited = false;
            loop {
                tokio::select! {
                    ready = ready_rx.recv() => match ready {
                        Ok(ready) => return Some(ready),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                    },
                    code = process_ref.wait(), if !exited => {
                        exited = true;
                        logs.system(format!("{} exited with code {} before signalling readiness", name, code));
                    }
                }
            }
        };

        let limit = self.config.limits.ready_timeout;
        match self.guarded(BuildPhase::Starting, limit, wait).await {
            Ok(Some(ready)) => {
                self.logs.system(format!("server ready at {}", ready.url));
                Ok(ReadyPreview {
                    ready,
                    strategy,
                    process,
                })
            }
            Ok(None) => {
                process.kill();
                Err(BuildError::StartFailure("runtime stopped reporting readiness".to_string()))
            }
            Err(e) => {
                process.kill();
                Err(e)
            }
        }
    }
}

async fn pump_lines(mut output: mpsc::Receiver<String>, logs: LogStream, source: LogSource) {
    while let Some(line) = output.recv().await {
        logs.append_text(source, line);
    }
}
