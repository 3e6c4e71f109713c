//! Preview orchestrator - main entry point

use crate::config::OrchestratorConfig;
use crate::detect::ProjectTypeDetector;
use crate::error::{BuildError, ConfigError};
use crate::handle::RuntimeHandle;
use crate::logs::LogStream;
use crate::mount::merge_files;
use crate::pipeline::{BuildOutcome, BuildPipeline};
use crate::preview::{instrument_document, PreviewChannel};
use crate::run::RunId;
use crate::runtime::RuntimeBooter;
use crate::static_doc::{assemble_document, to_data_url};
use previewkit_common::{
    BuildFailure, BuildPhase, DisplayHints, FailureKind, FileRecord, LogLine, OrchestratorEvent,
    ProjectClassification,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What the UI renders: phase, preview URL, and the last failure
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewStatus {
    pub run_id: Option<RunId>,
    pub phase: BuildPhase,
    pub classification: Option<ProjectClassification>,
    /// Sandbox-served URL, or a `data:` URL for static file sets
    pub preview_url: Option<String>,
    pub failure: Option<BuildFailure>,
    /// Explanation shown instead of a preview for native-only projects
    pub unsupported: Option<String>,
    pub hints: DisplayHints,
}

impl Default for PreviewStatus {
    fn default() -> Self {
        Self {
            run_id: None,
            phase: BuildPhase::Idle,
            classification: None,
            preview_url: None,
            failure: None,
            unsupported: None,
            hints: DisplayHints::default(),
        }
    }
}

impl PreviewStatus {
    /// Whether the current run has produced a preview or given up
    pub fn is_settled(&self) -> bool {
        self.preview_url.is_some() || self.failure.is_some() || self.unsupported.is_some()
    }
}

struct ActiveRun {
    run_id: RunId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ActiveRun {
    /// Cancel the run and wait until every process it spawned is gone
    async fn stop(self) {
        tracing::debug!(run_id = %self.run_id, "stopping active run");
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(run_id = %self.run_id, error = %e, "build task ended abnormally");
        }
    }
}

/// Everything a spawned run needs, detached from the orchestrator
struct RunContext {
    run_id: RunId,
    runtime: Arc<RuntimeHandle>,
    config: Arc<OrchestratorConfig>,
    logs: LogStream,
    cancel: CancellationToken,
    status: Arc<watch::Sender<PreviewStatus>>,
    events: broadcast::Sender<OrchestratorEvent>,
    files: Vec<FileRecord>,
    classification: ProjectClassification,
}

impl RunContext {
    fn update(&self, f: impl FnOnce(&mut PreviewStatus)) {
        let run_id = self.run_id;
        self.status.send_if_modified(|status| {
            if status.run_id != Some(run_id) {
                return false;
            }
            f(status);
            true
        });
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.events.send(event);
    }

    fn report_failure(&self, failure: BuildFailure) {
        if failure.kind == FailureKind::Cancelled {
            return;
        }
        self.update(|status| {
            status.phase = BuildPhase::Error;
            status.failure = Some(failure.clone());
        });
        self.emit(OrchestratorEvent::Failed {
            run_id: self.run_id.0,
            failure,
        });
    }

    /// The server stopped on its own after the preview went live
    fn report_server_exit(&self, exit_code: i32) {
        let err = BuildError::ServerExited { exit_code };
        self.update(|status| status.preview_url = None);
        self.report_failure(BuildFailure {
            kind: err.kind(),
            message: err.to_string(),
            phase_reached: BuildPhase::Ready,
            logs: self.logs.snapshot(),
        });
    }

    async fn execute(self) {
        let forwarder = tokio::spawn(forward_logs(
            self.run_id,
            self.logs.subscribe(),
            self.events.clone(),
        ));

        let runtime = tokio::select! {
            _ = self.cancel.cancelled() => {
                forwarder.abort();
                return;
            }
            runtime = self.runtime.acquire() => runtime,
        };

        let runtime = match runtime {
            Ok(runtime) => runtime,
            Err(e) => {
                let err = BuildError::from(e);
                self.logs.system(format!("error: {}", err));
                self.report_failure(BuildFailure {
                    kind: err.kind(),
                    message: err.to_string(),
                    phase_reached: BuildPhase::Idle,
                    logs: self.logs.snapshot(),
                });
                forwarder.abort();
                return;
            }
        };

        let mut pipeline = BuildPipeline::new(
            runtime,
            self.config.clone(),
            self.logs.clone(),
            self.cancel.clone(),
        )
        .with_run_id(self.run_id)
        .with_events(self.events.clone());

        let phases = tokio::spawn(track_phases(
            self.run_id,
            pipeline.subscribe_phase(),
            self.status.clone(),
        ));

        let exited = match pipeline.run(&self.files, &self.classification).await {
            BuildOutcome::Ready(preview) => {
                let url = preview.url().to_string();
                self.update(|status| status.preview_url = Some(url.clone()));
                self.emit(OrchestratorEvent::PreviewReady {
                    run_id: self.run_id.0,
                    url,
                    port: Some(preview.port()),
                });
                pipeline.hold(preview).await
            }
            BuildOutcome::Failed(failure) => {
                self.report_failure(failure);
                None
            }
        };

        drop(pipeline);
        let _ = phases.await;
        if let Some(exit_code) = exited {
            self.report_server_exit(exit_code);
        }
        forwarder.abort();
    }
}

async fn forward_logs(
    run_id: RunId,
    mut lines: broadcast::Receiver<LogLine>,
    events: broadcast::Sender<OrchestratorEvent>,
) {
    loop {
        match lines.recv().await {
            Ok(line) => {
                let _ = events.send(OrchestratorEvent::Log {
                    run_id: run_id.0,
                    line,
                });
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(%run_id, skipped, "log forwarder lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn track_phases(
    run_id: RunId,
    mut phases: watch::Receiver<BuildPhase>,
    status: Arc<watch::Sender<PreviewStatus>>,
) {
    while phases.changed().await.is_ok() {
        let phase = *phases.borrow_and_update();
        status.send_if_modified(|s| {
            if s.run_id != Some(run_id) {
                return false;
            }
            s.phase = phase;
            true
        });
    }
}

/// Build & preview orchestrator.
///
/// Owns the runtime handle, the merged file set, and at most one active run.
/// A new submission cancels the active run and waits for it to stop before the
/// next run starts, so two runs never share the mounted filesystem.
pub struct PreviewOrchestrator {
    config: Arc<OrchestratorConfig>,
    runtime: Arc<RuntimeHandle>,
    detector: ProjectTypeDetector,
    files: Mutex<Vec<FileRecord>>,
    logs: Mutex<LogStream>,
    active: tokio::sync::Mutex<Option<ActiveRun>>,
    status: Arc<watch::Sender<PreviewStatus>>,
    events: broadcast::Sender<OrchestratorEvent>,
}

impl PreviewOrchestrator {
    /// Create an orchestrator that boots its runtime with `booter` on first use
    pub fn new(booter: Arc<dyn RuntimeBooter>, config: OrchestratorConfig) -> Result<Self, ConfigError> {
        Self::with_handle(Arc::new(RuntimeHandle::new(booter)), config)
    }

    /// Create an orchestrator around an existing runtime handle
    pub fn with_handle(runtime: Arc<RuntimeHandle>, config: OrchestratorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (status, _) = watch::channel(PreviewStatus::default());
        let (events, _) = broadcast::channel(1024);
        Ok(Self {
            detector: ProjectTypeDetector::new(config.detector.clone()),
            logs: Mutex::new(LogStream::new(config.logs.capacity)),
            config: Arc::new(config),
            runtime,
            files: Mutex::new(Vec::new()),
            active: tokio::sync::Mutex::new(None),
            status: Arc::new(status),
            events,
        })
    }

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }

    /// Merge `files` into the current set (last write wins per path) and rebuild
    pub async fn submit(&self, files: Vec<FileRecord>) -> RunId {
        {
            let mut current = Self::lock(&self.files);
            *current = merge_files(&current, &files);
        }
        self.start_run().await
    }

    /// Replace the whole file set and rebuild
    pub async fn replace_files(&self, files: Vec<FileRecord>) -> RunId {
        *Self::lock(&self.files) = merge_files(&[], &files);
        self.start_run().await
    }

    /// Start a fresh run over the current file set
    pub async fn retry(&self) -> RunId {
        self.start_run().await
    }

    /// Stop the active run, if any, killing its processes
    pub async fn cancel(&self) {
        let previous = self.active.lock().await.take();
        if let Some(run) = previous {
            let run_id = run.run_id;
            run.stop().await;
            self.status.send_if_modified(|status| {
                if status.run_id != Some(run_id) {
                    return false;
                }
                status.phase = BuildPhase::Idle;
                status.preview_url = None;
                true
            });
            tracing::info!(%run_id, "run cancelled");
        }
    }

    /// Current status; also a change feed via `watch::Receiver::changed`
    pub fn status(&self) -> watch::Receiver<PreviewStatus> {
        self.status.subscribe()
    }

    pub fn current_status(&self) -> PreviewStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    /// Log snapshot of the current run
    pub fn logs(&self) -> Vec<LogLine> {
        Self::lock(&self.logs).snapshot()
    }

    /// The merged file set, sorted by path
    pub fn files(&self) -> Vec<FileRecord> {
        Self::lock(&self.files).clone()
    }

    /// Classification of the current run's file set
    pub fn classification(&self) -> Option<ProjectClassification> {
        self.status.borrow().classification.clone()
    }

    /// Pass device/zoom hints through to the status
    pub fn set_display_hints(&self, hints: DisplayHints) {
        self.status.send_modify(|status| status.hints = hints);
    }

    /// Re-publish picks from `channel` as orchestrator events
    pub fn forward_picks(&self, channel: &PreviewChannel) -> JoinHandle<()> {
        let mut picks = channel.subscribe_picks();
        let events = self.events.clone();
        tokio::spawn(async move {
            loop {
                match picks.recv().await {
                    Ok(picked) => {
                        tracing::debug!(identifier = %picked.identifier, "element picked");
                        let _ = events.send(OrchestratorEvent::ElementPicked {
                            identifier: picked.identifier,
                            details: picked.details,
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn unsupported_message(&self) -> String {
        let suggestion = self
            .config
            .detector
            .preview_dirs
            .first()
            .map(|dir| format!(" Add a browser build in a `{}/` folder to preview it here.", dir))
            .unwrap_or_default();
        format!(
            "This project targets a native (non-browser) runtime and cannot be previewed in the browser.{} Otherwise run it on a device or emulator.",
            suggestion
        )
    }

    async fn start_run(&self) -> RunId {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.stop().await;
        }

        let files = self.files();
        let classification = self.detector.classify(&files);
        let run_id = RunId::new();
        let logs = LogStream::new(self.config.logs.capacity);
        *Self::lock(&self.logs) = logs.clone();

        tracing::info!(%run_id, files = files.len(), %classification, "new preview run");
        self.status.send_modify(|status| {
            *status = PreviewStatus {
                run_id: Some(run_id),
                classification: Some(classification.clone()),
                hints: status.hints.clone(),
                ..PreviewStatus::default()
            };
        });
        let _ = self.events.send(OrchestratorEvent::Classified {
            run_id: run_id.0,
            classification: classification.clone(),
        });

        if !classification.is_buildable() {
            let message = self.unsupported_message();
            logs.system(message.clone());
            self.status.send_modify(|status| status.unsupported = Some(message.clone()));
            let _ = self.events.send(OrchestratorEvent::Unsupported {
                run_id: run_id.0,
                message,
            });
            return run_id;
        }

        if classification == ProjectClassification::Static && self.config.static_fallback {
            let document = instrument_document(
                &assemble_document(&files),
                self.config.preview.text_preview_chars,
            );
            let url = to_data_url(&document);
            logs.system("rendered static preview document");
            self.status.send_modify(|status| status.preview_url = Some(url.clone()));
            let _ = self.events.send(OrchestratorEvent::PreviewReady {
                run_id: run_id.0,
                url,
                port: None,
            });
            if !self.config.serve_static_in_sandbox {
                return run_id;
            }
        }

        let cancel = CancellationToken::new();
        let context = RunContext {
            run_id,
            runtime: self.runtime.clone(),
            config: self.config.clone(),
            logs,
            cancel: cancel.clone(),
            status: self.status.clone(),
            events: self.events.clone(),
            files,
            classification,
        };
        *active = Some(ActiveRun {
            run_id,
            cancel,
            task: tokio::spawn(context.execute()),
        });
        run_id
    }
}
