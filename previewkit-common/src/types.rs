//! Core data types shared between the orchestrator, the UI and the CLI

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single generated project file.
///
/// Paths are slash-delimited and relative; a leading `/` or `./` is tolerated
/// and stripped when the record is mounted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub content: String,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    /// File name component of the path
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Lowercased extension, if any
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name();
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }
}

/// How an incoming file set should be previewed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "working_dir", rename_all = "snake_case")]
pub enum ProjectClassification {
    /// Plain assets with no dependency manifest
    Static,
    /// Manifest-driven app rooted at the given directory ("" = project root)
    Manifest(String),
    /// Native target; `Some(dir)` names a nested browser-runnable subproject
    UnsupportedNative(Option<String>),
}

impl ProjectClassification {
    /// Directory all commands are scoped to, if a build is possible
    pub fn working_dir(&self) -> Option<&str> {
        match self {
            ProjectClassification::Static => Some(""),
            ProjectClassification::Manifest(dir) => Some(dir),
            ProjectClassification::UnsupportedNative(dir) => dir.as_deref(),
        }
    }

    /// Whether the sandbox pipeline has anything to run
    pub fn is_buildable(&self) -> bool {
        !matches!(self, ProjectClassification::UnsupportedNative(None))
    }

    /// Whether the install phase applies
    pub fn needs_install(&self) -> bool {
        matches!(
            self,
            ProjectClassification::Manifest(_) | ProjectClassification::UnsupportedNative(Some(_))
        )
    }
}

impl fmt::Display for ProjectClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectClassification::Static => write!(f, "static"),
            ProjectClassification::Manifest(dir) if dir.is_empty() => write!(f, "manifest(.)"),
            ProjectClassification::Manifest(dir) => write!(f, "manifest({})", dir),
            ProjectClassification::UnsupportedNative(Some(dir)) => {
                write!(f, "unsupported-native(preview: {})", dir)
            }
            ProjectClassification::UnsupportedNative(None) => write!(f, "unsupported-native"),
        }
    }
}

/// Build pipeline phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Idle,
    Mounting,
    Installing,
    Starting,
    Ready,
    Error,
}

impl BuildPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, BuildPhase::Ready | BuildPhase::Error)
    }

    /// Whether the state machine permits moving from `self` to `next`
    pub fn can_transition_to(self, next: BuildPhase) -> bool {
        use BuildPhase::*;
        match (self, next) {
            (from, Error) => !from.is_terminal(),
            (Idle, Mounting) => true,
            (Mounting, Installing) | (Mounting, Starting) => true,
            (Installing, Starting) => true,
            (Starting, Ready) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildPhase::Idle => "idle",
            BuildPhase::Mounting => "mounting",
            BuildPhase::Installing => "installing",
            BuildPhase::Starting => "starting",
            BuildPhase::Ready => "ready",
            BuildPhase::Error => "error",
        };
        f.write_str(name)
    }
}

/// Origin of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Install,
    Start,
    System,
}

/// One line of build output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub source: LogSource,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl LogLine {
    pub fn new(source: LogSource, text: impl Into<String>) -> Self {
        Self {
            source,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(LogSource::System, text)
    }
}

/// Error taxonomy surfaced to the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    CapabilityUnsupported,
    MountError,
    InstallFailure,
    StartFailure,
    UnsupportedProjectType,
    Timeout,
    Cancelled,
}

impl FailureKind {
    /// Whether starting a fresh run could plausibly succeed
    pub fn is_retryable(self) -> bool {
        !matches!(
            self,
            FailureKind::CapabilityUnsupported | FailureKind::UnsupportedProjectType
        )
    }
}

/// Terminal failure of a build run, with everything needed to diagnose it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Last phase the run entered before failing
    pub phase_reached: BuildPhase,
    pub logs: Vec<LogLine>,
}

/// Device/zoom presentation hints; passed through untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisplayHints {
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub zoom: Option<f32>,
}
