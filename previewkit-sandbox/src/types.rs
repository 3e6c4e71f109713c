//! Core types for driving processes inside the sandbox runtime

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

/// A command to run inside the sandbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Program to execute
    pub program: String,

    /// Arguments passed verbatim
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory relative to the mount root ("" = root)
    #[serde(default)]
    pub cwd: String,
}

impl CommandSpec {
    /// Create a command rooted at the mount root
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: String::new(),
        }
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Scope the command to a working directory
    pub fn in_dir(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Human-readable command line, for logs
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Emitted by the runtime when a spawned server starts accepting connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerReady {
    pub port: u16,
    pub url: String,
}

/// Host-side view of a process spawned inside the runtime.
///
/// Output arrives line by line; the exit code arrives once. Dropping the
/// handle or calling [`SpawnedProcess::kill`] asks the runtime to terminate it.
#[derive(Debug)]
pub struct SpawnedProcess {
    pub output: mpsc::Receiver<String>,
    exit: oneshot::Receiver<i32>,
    exit_code: Option<i32>,
    kill: Option<oneshot::Sender<()>>,
}

/// Runtime-side ends of a [`SpawnedProcess`]
pub struct ProcessPipes {
    pub output: mpsc::Sender<String>,
    pub exit: oneshot::Sender<i32>,
    pub killed: oneshot::Receiver<()>,
}

impl SpawnedProcess {
    /// Create a connected process handle and the pipes a runtime feeds it through
    pub fn pair() -> (ProcessPipes, SpawnedProcess) {
        let (output_tx, output_rx) = mpsc::channel(256);
        let (exit_tx, exit_rx) = oneshot::channel();
        let (kill_tx, kill_rx) = oneshot::channel();

        (
            ProcessPipes {
                output: output_tx,
                exit: exit_tx,
                killed: kill_rx,
            },
            SpawnedProcess {
                output: output_rx,
                exit: exit_rx,
                exit_code: None,
                kill: Some(kill_tx),
            },
        )
    }

    /// Wait for the exit code. A runtime that drops the exit pipe reports -1.
    pub async fn wait(&mut self) -> i32 {
        if let Some(code) = self.exit_code {
            return code;
        }
        let code = (&mut self.exit).await.unwrap_or(-1);
        self.exit_code = Some(code);
        code
    }

    /// Take the output receiver, leaving a closed one behind
    pub fn take_output(&mut self) -> mpsc::Receiver<String> {
        let (_, closed) = mpsc::channel(1);
        std::mem::replace(&mut self.output, closed)
    }

    /// Non-blocking exit check
    pub fn try_exit_code(&mut self) -> Option<i32> {
        if self.exit_code.is_none() {
            self.exit_code = match self.exit.try_recv() {
                Ok(code) => Some(code),
                Err(oneshot::error::TryRecvError::Empty) => None,
                Err(oneshot::error::TryRecvError::Closed) => Some(-1),
            };
        }
        self.exit_code
    }

    /// Ask the runtime to terminate the process. Idempotent.
    pub fn kill(&mut self) {
        if let Some(tx) = self.kill.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for SpawnedProcess {
    fn drop(&mut self) {
        self.kill();
    }
}
