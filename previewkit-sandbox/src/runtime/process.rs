//! Process-based runtime - runs the project on the local machine

use crate::error::{BootError, RuntimeError};
use crate::mount::MountNode;
use crate::types::{CommandSpec, ProcessPipes, ServerReady, SpawnedProcess};
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc, Mutex};

/// Spots dev-server banners like `Local: http://localhost:5173/`
#[derive(Clone)]
pub(crate) struct ReadyDetector {
    url: Regex,
    ansi: Regex,
}

impl ReadyDetector {
    pub(crate) fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            url: Regex::new(
                r"https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1\]|\[::\]):\d{2,5}[^\s'\x22]*",
            )?,
            ansi: Regex::new(r"\x1b\[[0-9;]*[A-Za-z]")?,
        })
    }

    pub(crate) fn detect(&self, line: &str) -> Option<ServerReady> {
        let clean = self.ansi.replace_all(line, "");
        let found = self.url.find(&clean)?.as_str();
        let normalized = found.replace("0.0.0.0", "localhost").replace("[::]", "localhost");
        let url = url::Url::parse(&normalized).ok()?;
        let port = url.port_or_known_default()?;
        Some(ServerReady {
            port,
            url: url.to_string(),
        })
    }
}

/// Process-based runtime - mounts files into a directory and runs real commands there
pub struct ProcessRuntime {
    root: PathBuf,
    // keeps an auto-created root alive for the runtime's lifetime
    _tempdir: Option<tempfile::TempDir>,
    ready_tx: broadcast::Sender<ServerReady>,
    detector: ReadyDetector,
    mounted: Mutex<BTreeSet<String>>,
}

impl ProcessRuntime {
    fn new(root: PathBuf, tempdir: Option<tempfile::TempDir>, detector: ReadyDetector) -> Self {
        let (ready_tx, _) = broadcast::channel(16);
        Self {
            root,
            _tempdir: tempdir,
            ready_tx,
            detector,
            mounted: Mutex::new(BTreeSet::new()),
        }
    }

    /// Directory the project is mounted into
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }
}

#[async_trait]
impl super::SandboxRuntime for ProcessRuntime {
    async fn mount(&self, tree: &MountNode) -> Result<(), RuntimeError> {
        if !matches!(tree, MountNode::Directory(_)) {
            return Err(RuntimeError::Mount("mount root must be a directory".to_string()));
        }

        let mut mounted = self.mounted.lock().await;
        let paths: BTreeSet<String> = tree.leaf_paths().into_iter().collect();

        // Files from the previous generation that are gone now
        for stale in mounted.difference(&paths) {
            let path = self.resolve(stale);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(path = %path.display(), error = %e, "failed to remove stale file");
                }
            }
        }

        for relative in &paths {
            let Some(contents) = tree.contents(relative) else {
                continue;
            };
            let path = self.resolve(relative);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, contents).await?;
        }

        tracing::debug!(root = %self.root.display(), files = paths.len(), "mounted file tree");
        *mounted = paths;
        Ok(())
    }

    async fn spawn(&self, command: &CommandSpec) -> Result<SpawnedProcess, RuntimeError> {
        let cwd = self.resolve(&command.cwd);
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(&cwd)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);
        // own process group, so a kill reaches servers started by npm/npx/sh
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| RuntimeError::Spawn {
            command: command.display(),
            reason: e.to_string(),
        })?;
        let pid = child.id();

        tracing::debug!(command = %command.display(), cwd = %cwd.display(), pid = ?pid, "spawned process");

        let (pipes, process) = SpawnedProcess::pair();
        let ProcessPipes {
            output,
            exit,
            mut killed,
        } = pipes;
        let announced = Arc::new(AtomicBool::new(false));

        // Stream stdout and stderr into the same line channel
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(
                stdout,
                output.clone(),
                self.detector.clone(),
                self.ready_tx.clone(),
                announced.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(
                stderr,
                output.clone(),
                self.detector.clone(),
                self.ready_tx.clone(),
                announced,
            ));
        }
        drop(output);

        let shown = command.display();
        tokio::spawn(async move {
            let code = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => status.code().unwrap_or(1),
                    Err(e) => {
                        tracing::warn!(command = %shown, error = %e, "process wait error");
                        1
                    }
                },
                _ = &mut killed => {
                    tracing::debug!(command = %shown, "killing process group");
                    kill_group(pid);
                    let _ = child.kill().await;
                    -1
                }
            };
            let _ = exit.send(code);
        });

        Ok(process)
    }

    fn subscribe_ready(&self) -> broadcast::Receiver<ServerReady> {
        self.ready_tx.subscribe()
    }

    fn name(&self) -> &str {
        "process"
    }
}

async fn forward_lines<R>(
    reader: R,
    output: mpsc::Sender<String>,
    detector: ReadyDetector,
    ready_tx: broadcast::Sender<ServerReady>,
    announced: Arc<AtomicBool>,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if !announced.load(Ordering::Acquire) {
            if let Some(ready) = detector.detect(&line) {
                if !announced.swap(true, Ordering::AcqRel) {
                    tracing::info!(url = %ready.url, port = ready.port, "server ready");
                    let _ = ready_tx.send(ready);
                }
            }
        }
        if output.send(line).await.is_err() {
            break;
        }
    }
}

/// SIGKILL every process in the group led by `pid`
#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // SAFETY: kill(2) with a negated pgid only signals; no memory is touched
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc == -1 {
        tracing::debug!(pgid, error = %std::io::Error::last_os_error(), "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

/// Boots a [`ProcessRuntime`] after probing the host for the required toolchain
pub struct ProcessRuntimeBooter {
    root: Option<PathBuf>,
    required_programs: Vec<String>,
}

impl ProcessRuntimeBooter {
    /// Boot into a fresh temporary directory
    pub fn new() -> Self {
        Self {
            root: None,
            required_programs: vec!["node".to_string(), "npm".to_string()],
        }
    }

    /// Mount into `root` instead of a temporary directory
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Programs that must be on `PATH` for boot to succeed
    pub fn require_programs<I, S>(mut self, programs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_programs = programs.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for ProcessRuntimeBooter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl super::RuntimeBooter for ProcessRuntimeBooter {
    async fn boot(&self) -> Result<Arc<dyn super::SandboxRuntime>, BootError> {
        for program in &self.required_programs {
            if find_on_path(program).is_none() {
                return Err(BootError::CapabilityUnsupported(format!(
                    "'{}' was not found on PATH",
                    program
                )));
            }
        }

        let detector = ReadyDetector::new().map_err(|e| BootError::Failed(e.to_string()))?;

        let runtime = match &self.root {
            Some(root) => {
                tokio::fs::create_dir_all(root).await.map_err(|e| {
                    BootError::Failed(format!("cannot create {}: {}", root.display(), e))
                })?;
                ProcessRuntime::new(root.clone(), None, detector)
            }
            None => {
                let tempdir = tempfile::Builder::new()
                    .prefix("previewkit-")
                    .tempdir()
                    .map_err(|e| BootError::Failed(format!("cannot create temp dir: {}", e)))?;
                ProcessRuntime::new(tempdir.path().to_path_buf(), Some(tempdir), detector)
            }
        };

        tracing::info!(root = %runtime.root().display(), "process runtime booted");
        Ok(Arc::new(runtime))
    }
}

fn find_on_path(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path).find_map(|dir| {
        let full = dir.join(program);
        if full.is_file() {
            return Some(full);
        }
        #[cfg(windows)]
        {
            let exe = dir.join(format!("{}.exe", program));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}
