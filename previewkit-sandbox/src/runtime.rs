//! Runtime trait and implementations

#[cfg(feature = "process")]
mod process;

use crate::error::{BootError, RuntimeError};
use crate::mount::MountNode;
use crate::types::{CommandSpec, ServerReady, SpawnedProcess};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

#[cfg(feature = "process")]
pub use process::{ProcessRuntime, ProcessRuntimeBooter};

/// The sandboxed execution environment previews run in.
///
/// Implementations own their filesystem and every process spawned in it.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Replace the mounted filesystem with `tree`
    async fn mount(&self, tree: &MountNode) -> Result<(), RuntimeError>;

    /// Spawn a process. An `Err` means the command could not be started at all.
    async fn spawn(&self, command: &CommandSpec) -> Result<SpawnedProcess, RuntimeError>;

    /// Subscribe to "server ready" notifications for servers started in this runtime
    fn subscribe_ready(&self) -> broadcast::Receiver<ServerReady>;

    /// Get runtime name
    fn name(&self) -> &str;
}

/// Boots a runtime instance. Called at most once per [`crate::RuntimeHandle`] until reset.
#[async_trait]
pub trait RuntimeBooter: Send + Sync {
    async fn boot(&self) -> Result<Arc<dyn SandboxRuntime>, BootError>;
}
