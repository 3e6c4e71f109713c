//! CLI command implementations
//!
//! Each command reads a project directory into file records and hands them
//! to the orchestrator library.

use anyhow::{anyhow, bail, Context, Result};
use previewkit_common::{FileRecord, LogSource, OrchestratorEvent, ProjectClassification};
use previewkit_sandbox::{
    assemble_document, build_mount_tree, instrument_document, to_data_url, OrchestratorConfig,
    PreviewOrchestrator, ProcessRuntimeBooter, ProjectTypeDetector,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Directories never read into the file set
const SKIPPED_DIRS: &[&str] = &["node_modules", ".git", "dist", "build", ".next", "target"];

/// Read every UTF-8 file under `dir` as a file record with a relative, slash-separated path
pub fn read_project(dir: &Path) -> Result<Vec<FileRecord>> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }

    let walker = WalkDir::new(dir).follow_links(false).into_iter().filter_entry(|entry| {
        entry.depth() == 0
            || !entry.file_type().is_dir()
            || !SKIPPED_DIRS.iter().any(|skip| entry.file_name() == *skip)
    });

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = relative_path(dir, entry.path())?;
        match std::fs::read_to_string(entry.path()) {
            Ok(content) => files.push(FileRecord::new(relative, content)),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                debug!("Skipping non-UTF-8 file {}", relative);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", entry.path().display()))
            }
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    debug!("Read {} files from {}", files.len(), dir.display());
    Ok(files)
}

fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| anyhow!("{} is outside {}", path.display(), root.display()))?;
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(segments.join("/"))
}

fn write_or_print(output: Option<&Path>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => println!("{}", content),
    }
    Ok(())
}

/// Execute classify command
pub fn execute_classify(dir: &Path, json: bool) -> Result<()> {
    let files = read_project(dir)?;
    let classification = ProjectTypeDetector::default().classify(&files);

    if json {
        println!("{}", serde_json::to_string_pretty(&classification)?);
        return Ok(());
    }

    println!("{}", classification);
    match &classification {
        ProjectClassification::Static => println!("Renders directly as a static document"),
        ProjectClassification::Manifest(dir) | ProjectClassification::UnsupportedNative(Some(dir)) => {
            let scope = if dir.is_empty() { "." } else { dir.as_str() };
            println!("Builds in the sandbox from {}", scope);
        }
        ProjectClassification::UnsupportedNative(None) => {
            println!("Native project with no browser-runnable subproject; no preview possible")
        }
    }
    Ok(())
}

/// Execute tree command
pub fn execute_tree(dir: &Path) -> Result<()> {
    let files = read_project(dir)?;
    let tree = build_mount_tree(&files)?;
    println!("{}", serde_json::to_string_pretty(&tree)?);
    Ok(())
}

/// Execute assemble command
pub fn execute_assemble(dir: &Path, output: Option<&Path>, data_url: bool) -> Result<()> {
    let files = read_project(dir)?;
    let classification = ProjectTypeDetector::default().classify(&files);
    if classification != ProjectClassification::Static {
        warn!(
            "{} is classified as {}; assembling its static assets anyway",
            dir.display(),
            classification
        );
    }

    let document = assemble_document(&files);
    if data_url {
        write_or_print(output, &to_data_url(&document))
    } else {
        write_or_print(output, &document)
    }
}

/// Execute instrument command
pub fn execute_instrument(file: &Path, output: Option<&Path>, config: Option<&Path>) -> Result<()> {
    let config = OrchestratorConfig::load_or_default(config)?;
    let html = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    write_or_print(
        output,
        &instrument_document(&html, config.preview.text_preview_chars),
    )
}

/// Execute build command: run the full pipeline on the local process runtime
pub async fn execute_build(dir: &Path, root: Option<PathBuf>, config: Option<&Path>) -> Result<()> {
    let config = OrchestratorConfig::load_or_default(config)?;
    let files = read_project(dir)?;

    let mut booter = ProcessRuntimeBooter::new();
    if let Some(root) = root {
        booter = booter.with_root(root);
    }
    let orchestrator = PreviewOrchestrator::new(Arc::new(booter), config)?;
    let mut events = BroadcastStream::new(orchestrator.subscribe());

    info!("Submitting {} files from {}", files.len(), dir.display());
    orchestrator.submit(files).await;

    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping preview");
                break Ok(());
            }
            event = events.next() => match event {
                Some(Ok(event)) => {
                    if let Some(done) = handle_event(event) {
                        break done;
                    }
                }
                Some(Err(lagged)) => debug!("Event stream lagged: {}", lagged),
                None => break Ok(()),
            }
        }
    };

    orchestrator.cancel().await;
    result
}

/// Print one event. Returns `Some` once the command should stop.
fn handle_event(event: OrchestratorEvent) -> Option<Result<()>> {
    match event {
        OrchestratorEvent::Classified { classification, .. } => {
            println!("Project: {}", classification);
        }
        OrchestratorEvent::PhaseChanged { phase, .. } => println!("==> {}", phase),
        OrchestratorEvent::Log { line, .. } => {
            let source = match line.source {
                LogSource::Install => "install",
                LogSource::Start => "start",
                LogSource::System => "system",
            };
            println!("[{}] {}", source, line.text);
        }
        OrchestratorEvent::PreviewReady { url, port, .. } => match port {
            Some(_) => println!("Preview ready at {} (Ctrl-C to stop)", url),
            None => {
                println!(
                    "Static preview rendered as a {} byte data: URL; use `previewkit assemble` to write it to a file",
                    url.len()
                );
                return Some(Ok(()));
            }
        },
        OrchestratorEvent::Failed { failure, .. } => {
            eprintln!(
                "Build failed during {} ({:?}): {}",
                failure.phase_reached, failure.kind, failure.message
            );
            return Some(Err(anyhow!(failure.message)));
        }
        OrchestratorEvent::Unsupported { message, .. } => {
            println!("{}", message);
            return Some(Ok(()));
        }
        OrchestratorEvent::ElementPicked { identifier, .. } => println!("Picked {}", identifier),
    }
    None
}
