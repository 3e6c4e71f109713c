use previewkit_common::{BuildPhase, FailureKind};
use std::time::Duration;
use thiserror::Error;

/// Errors booting the sandbox runtime.
///
/// `Clone` so one memoized boot outcome can be handed to every caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BootError {
    #[error("host lacks a capability the sandbox requires: {0}")]
    CapabilityUnsupported(String),

    #[error("sandbox boot failed: {0}")]
    Failed(String),
}

impl BootError {
    /// Fatal errors must not be retried without an explicit reset
    pub fn is_fatal(&self) -> bool {
        matches!(self, BootError::CapabilityUnsupported(_))
    }
}

/// Errors from the runtime's own APIs
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to spawn '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("mount failed: {0}")]
    Mount(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Structural problems with a file set
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MountError {
    #[error("invalid path '{0}'")]
    InvalidPath(String),

    #[error("'{0}' is both a file and a directory")]
    Conflict(String),

    #[error("runtime rejected mount: {0}")]
    Runtime(String),
}

/// Why a build run ended in `Error`
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Boot(#[from] BootError),

    #[error(transparent)]
    Mount(#[from] MountError),

    #[error("dependency install failed after fallback retry (exit code {exit_code})")]
    InstallFailure { exit_code: i32 },

    #[error("every start strategy failed to spawn: {0}")]
    StartFailure(String),

    #[error("preview server exited with code {exit_code}")]
    ServerExited { exit_code: i32 },

    #[error("project targets a non-browser runtime; no browser preview is available")]
    UnsupportedProjectType,

    #[error("{phase} did not finish within {}", humantime::format_duration(*.after))]
    Timeout { phase: BuildPhase, after: Duration },

    #[error("run cancelled")]
    Cancelled,
}

impl BuildError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BuildError::Boot(BootError::CapabilityUnsupported(_)) => {
                FailureKind::CapabilityUnsupported
            }
            // a failed boot surfaces like a failed start: nothing could run
            BuildError::Boot(BootError::Failed(_)) => FailureKind::StartFailure,
            BuildError::Mount(_) => FailureKind::MountError,
            BuildError::InstallFailure { .. } => FailureKind::InstallFailure,
            BuildError::StartFailure(_) | BuildError::ServerExited { .. } => {
                FailureKind::StartFailure
            }
            BuildError::UnsupportedProjectType => FailureKind::UnsupportedProjectType,
            BuildError::Timeout { .. } => FailureKind::Timeout,
            BuildError::Cancelled => FailureKind::Cancelled,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Preview channel delivery errors
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("no preview surface attached")]
    NoSurface,

    #[error("failed to post message to preview: {0}")]
    Transport(String),

    #[error(transparent)]
    Protocol(#[from] previewkit_common::ProtocolError),
}
