//! previewkit sandbox - build & preview orchestration
//!
//! Turns a flat set of generated project files into a running preview:
//! classify the set, mount it into a sandbox runtime, install dependencies,
//! start a dev server, and instrument the resulting page for element picking.
//! Static sets short-circuit to a self-contained `data:` document.

mod config;
mod detect;
mod error;
mod handle;
mod limits;
mod logs;
mod mount;
mod pipeline;
mod preview;
mod run;
mod runtime;
mod service;
mod skeleton;
mod static_doc;
mod strategy;
mod types;

pub use config::{DetectorConfig, LogConfig, OrchestratorConfig, PreviewConfig, StartConfig};
pub use detect::{join_path, Manifest, ProjectTypeDetector};
pub use error::{BootError, BuildError, ChannelError, ConfigError, MountError, RuntimeError};
pub use handle::RuntimeHandle;
pub use limits::PhaseLimits;
pub use logs::LogStream;
pub use mount::{build_mount_tree, files_under, merge_files, normalize_path, MountNode};
pub use pipeline::{BuildOutcome, BuildPipeline, ReadyPreview};
pub use preview::{
    derive_identifier, instrument_document, instrument_entry, instrumentation_script,
    ClickOutcome, Delivery, PickedElement, PreviewChannel, PreviewTransport, RetryPolicy,
    SelectionAgent, SurfaceId,
};
pub use run::{PhaseTracker, RunId};
#[cfg(feature = "process")]
pub use runtime::{ProcessRuntime, ProcessRuntimeBooter};
pub use runtime::{RuntimeBooter, SandboxRuntime};
pub use service::{PreviewOrchestrator, PreviewStatus};
pub use skeleton::{skeleton_files, Framework};
pub use static_doc::{assemble_document, find_entry_document, to_data_url};
pub use strategy::{default_strategies, StartStrategy};
pub use types::{CommandSpec, ProcessPipes, ServerReady, SpawnedProcess};

/// Re-export common error types
pub type Result<T> = anyhow::Result<T>;
