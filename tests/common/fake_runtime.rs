//! Scripted in-memory sandbox runtime

use async_trait::async_trait;
use previewkit_sandbox::{
    BootError, CommandSpec, MountNode, ProcessPipes, RuntimeBooter, RuntimeError, SandboxRuntime,
    ServerReady, SpawnedProcess,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

/// What a spawned command does
#[derive(Debug, Clone)]
pub enum Script {
    /// Print `output` and exit with `code`
    Exit { code: i32, output: Vec<String> },
    /// Print `output`, announce a server on `port`, run until killed
    Serve { port: u16, output: Vec<String> },
    /// Announce a server on `port`, then exit with `code` after `after`
    Crash { port: u16, after: Duration, code: i32 },
    /// Run silently until killed
    Hang,
    /// Fail to spawn at all
    Unavailable,
}

impl Script {
    pub fn exit(code: i32) -> Self {
        Script::Exit {
            code,
            output: Vec::new(),
        }
    }

    pub fn exit_with(code: i32, output: &[&str]) -> Self {
        Script::Exit {
            code,
            output: output.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn serve(port: u16) -> Self {
        Script::Serve {
            port,
            output: vec![format!("  Local:   http://localhost:{}/", port)],
        }
    }

    pub fn crash_after(port: u16, after: Duration, code: i32) -> Self {
        Script::Crash { port, after, code }
    }
}

struct Rule {
    prefix: String,
    scripts: VecDeque<Script>,
}

/// Runtime whose commands follow scripts matched by command-line prefix.
///
/// Each rule plays its scripts in order and repeats the last one. Commands
/// with no matching rule fail to spawn.
pub struct FakeRuntime {
    rules: Mutex<Vec<Rule>>,
    ready: broadcast::Sender<ServerReady>,
    mounts: Mutex<Vec<MountNode>>,
    spawned: Mutex<Vec<CommandSpec>>,
    live: Arc<watch::Sender<usize>>,
    mount_delay: Mutex<Option<Duration>>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        let (ready, _) = broadcast::channel(16);
        let (live, _) = watch::channel(0);
        Arc::new(Self {
            rules: Mutex::new(Vec::new()),
            ready,
            mounts: Mutex::new(Vec::new()),
            spawned: Mutex::new(Vec::new()),
            live: Arc::new(live),
            mount_delay: Mutex::new(None),
        })
    }

    /// Script commands whose command line starts with `prefix`
    pub fn on(&self, prefix: &str, scripts: impl IntoIterator<Item = Script>) -> &Self {
        self.rules.lock().unwrap().push(Rule {
            prefix: prefix.to_string(),
            scripts: scripts.into_iter().collect(),
        });
        self
    }

    pub fn delay_mounts(&self, delay: Duration) {
        *self.mount_delay.lock().unwrap() = Some(delay);
    }

    pub fn mounts(&self) -> Vec<MountNode> {
        self.mounts.lock().unwrap().clone()
    }

    /// Command lines spawned so far, in order
    pub fn spawned(&self) -> Vec<String> {
        self.spawned.lock().unwrap().iter().map(|c| c.display()).collect()
    }

    pub fn spawned_specs(&self) -> Vec<CommandSpec> {
        self.spawned.lock().unwrap().clone()
    }

    /// Processes started and not yet killed
    pub fn live_processes(&self) -> usize {
        *self.live.borrow()
    }

    /// Wait until every long-running process has been killed
    pub async fn wait_idle(&self) {
        let mut live = self.live.subscribe();
        let _ = live.wait_for(|n| *n == 0).await;
    }

    fn next_script(&self, command_line: &str) -> Script {
        let mut rules = self.rules.lock().unwrap();
        let Some(rule) = rules.iter_mut().find(|r| command_line.starts_with(&r.prefix)) else {
            return Script::Unavailable;
        };
        if rule.scripts.len() > 1 {
            rule.scripts.pop_front().unwrap_or(Script::Unavailable)
        } else {
            rule.scripts.front().cloned().unwrap_or(Script::Unavailable)
        }
    }

    fn launch(&self, script: Script) -> SpawnedProcess {
        let (pipes, process) = SpawnedProcess::pair();
        let ready = self.ready.clone();
        let live = self.live.clone();

        tokio::spawn(async move {
            let ProcessPipes {
                output,
                exit,
                killed,
            } = pipes;
            match script {
                Script::Exit { code, output: lines } => {
                    for line in lines {
                        let _ = output.send(line).await;
                    }
                    let _ = exit.send(code);
                }
                Script::Serve { port, output: lines } => {
                    live.send_modify(|n| *n += 1);
                    for line in lines {
                        let _ = output.send(line).await;
                    }
                    let _ = ready.send(ServerReady {
                        port,
                        url: format!("http://localhost:{}/", port),
                    });
                    let _ = killed.await;
                    live.send_modify(|n| *n -= 1);
                    let _ = exit.send(-1);
                }
                Script::Crash { port, after, code } => {
                    live.send_modify(|n| *n += 1);
                    let _ = ready.send(ServerReady {
                        port,
                        url: format!("http://localhost:{}/", port),
                    });
                    let code = tokio::select! {
                        _ = killed => -1,
                        _ = tokio::time::sleep(after) => code,
                    };
                    live.send_modify(|n| *n -= 1);
                    let _ = exit.send(code);
                }
                Script::Hang => {
                    live.send_modify(|n| *n += 1);
                    let _ = killed.await;
                    live.send_modify(|n| *n -= 1);
                    let _ = exit.send(-1);
                }
                Script::Unavailable => {}
            }
        });

        process
    }
}

#[async_trait]
impl SandboxRuntime for FakeRuntime {
    async fn mount(&self, tree: &MountNode) -> Result<(), RuntimeError> {
        let delay = *self.mount_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.mounts.lock().unwrap().push(tree.clone());
        Ok(())
    }

    async fn spawn(&self, command: &CommandSpec) -> Result<SpawnedProcess, RuntimeError> {
        self.spawned.lock().unwrap().push(command.clone());
        match self.next_script(&command.display()) {
            Script::Unavailable => Err(RuntimeError::Spawn {
                command: command.display(),
                reason: "command not found".to_string(),
            }),
            script => Ok(self.launch(script)),
        }
    }

    fn subscribe_ready(&self) -> broadcast::Receiver<ServerReady> {
        self.ready.subscribe()
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Boots a shared [`FakeRuntime`], counting boots
pub struct FakeBooter {
    pub runtime: Arc<FakeRuntime>,
    boots: AtomicUsize,
    delay: Option<Duration>,
    failure: Option<BootError>,
}

impl FakeBooter {
    pub fn new(runtime: Arc<FakeRuntime>) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            boots: AtomicUsize::new(0),
            delay: None,
            failure: None,
        })
    }

    pub fn slow(runtime: Arc<FakeRuntime>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            boots: AtomicUsize::new(0),
            delay: Some(delay),
            failure: None,
        })
    }

    pub fn failing(failure: BootError) -> Arc<Self> {
        Arc::new(Self {
            runtime: FakeRuntime::new(),
            boots: AtomicUsize::new(0),
            delay: None,
            failure: Some(failure),
        })
    }

    pub fn boots(&self) -> usize {
        self.boots.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RuntimeBooter for FakeBooter {
    async fn boot(&self) -> Result<Arc<dyn SandboxRuntime>, BootError> {
        self.boots.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        Ok(self.runtime.clone())
    }
}
