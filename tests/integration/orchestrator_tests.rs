//! Orchestrator runs end to end against the scripted runtime

use crate::common::*;
use assert_matches::assert_matches;
use base64::Engine;
use previewkit_common::{
    BuildPhase, DisplayHints, FailureKind, FileRecord, OrchestratorEvent, ProjectClassification,
};
use previewkit_sandbox::{
    assemble_document, BootError, OrchestratorConfig, PhaseLimits, PreviewConfig,
    PreviewOrchestrator, PreviewStatus, RuntimeHandle,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_test::assert_ok;

fn orchestrator(booter: Arc<FakeBooter>) -> PreviewOrchestrator {
    let config = OrchestratorConfig {
        limits: PhaseLimits::strict(),
        ..OrchestratorConfig::default()
    };
    PreviewOrchestrator::new(booter, config).unwrap()
}

async fn settled(orchestrator: &PreviewOrchestrator) -> PreviewStatus {
    let mut status = orchestrator.status();
    let settled = status.wait_for(|s| s.is_settled()).await.unwrap().clone();
    settled
}

/// Collect events until none arrives for a second
async fn drain(rx: &mut broadcast::Receiver<OrchestratorEvent>) -> Vec<OrchestratorEvent> {
    let mut events = Vec::new();
    while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
        events.push(event);
    }
    events
}

fn decode_data_url(url: &str) -> String {
    let encoded = url.strip_prefix("data:text/html;base64,").unwrap();
    String::from_utf8(base64::engine::general_purpose::STANDARD.decode(encoded).unwrap()).unwrap()
}

fn phases(events: &[OrchestratorEvent]) -> Vec<BuildPhase> {
    events
        .iter()
        .filter_map(|e| match e {
            OrchestratorEvent::PhaseChanged { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_static_site_renders_without_sandbox() {
    setup_test_logging();
    let runtime = FakeRuntime::new();
    let booter = FakeBooter::new(runtime.clone());
    let orchestrator = orchestrator(booter.clone());
    let mut events = orchestrator.subscribe();

    orchestrator.submit(static_site()).await;
    let status = orchestrator.current_status();

    // the assembled document is untouched; the served copy carries the agent
    assert_eq!(assemble_document(&static_site()), "<html><body>Hi</body></html>");
    let url = status.preview_url.expect("static preview url");
    let document = decode_data_url(&url);
    assert!(document.starts_with("<html><body>Hi<script data-previewkit-agent>"));
    assert!(document.ends_with("</script></body></html>"));
    assert!(document.contains("var TEXT_LIMIT = 80;"));

    assert_eq!(status.phase, BuildPhase::Idle);
    assert_eq!(status.classification, Some(ProjectClassification::Static));
    assert_eq!(booter.boots(), 0);
    assert!(runtime.mounts().is_empty());

    let events = drain(&mut events).await;
    assert_matches!(events.last(), Some(OrchestratorEvent::PreviewReady { port: None, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_static_site_inlines_styles_and_scripts() {
    let booter = FakeBooter::new(FakeRuntime::new());
    let orchestrator = orchestrator(booter);

    let mut files = static_site();
    files.push(FileRecord::new("styles.css", "body { color: red }"));
    files.push(FileRecord::new("app.js", "console.log('hi')"));
    orchestrator.submit(files).await;

    let url = orchestrator.current_status().preview_url.unwrap();
    let document = decode_data_url(&url);
    assert!(document.contains("<style>\nbody { color: red }"));
    assert!(document.contains("console.log('hi')"));
    assert!(document.find("<style>").unwrap() < document.find("<script>").unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_static_agent_uses_configured_text_limit() {
    let config = OrchestratorConfig {
        preview: PreviewConfig {
            text_preview_chars: 12,
            ..PreviewConfig::default()
        },
        ..OrchestratorConfig::default()
    };
    let orchestrator =
        PreviewOrchestrator::new(FakeBooter::new(FakeRuntime::new()), config).unwrap();
    orchestrator.submit(static_site()).await;

    let document = decode_data_url(&orchestrator.current_status().preview_url.unwrap());
    assert!(document.contains("var TEXT_LIMIT = 12;"));
}

#[tokio::test(start_paused = true)]
async fn test_mounted_entry_document_carries_the_agent() {
    let runtime = FakeRuntime::new();
    runtime
        .on("npm install", [Script::exit(0)])
        .on("npm run dev", [Script::serve(DEV_SERVER_PORT)]);
    let orchestrator = orchestrator(FakeBooter::new(runtime.clone()));

    orchestrator.submit(vite_project()).await;
    settled(&orchestrator).await;

    let mounts = runtime.mounts();
    let entry = mounts[0].contents("index.html").unwrap();
    assert_eq!(entry.matches("data-previewkit-agent").count(), 1);
    assert!(entry.contains(r#"<div id="root"></div>"#));
    assert!(mounts[0].contents("src/App.jsx").unwrap().contains("Todos"));
    // the caller's file set keeps the original document
    let files = orchestrator.files();
    let index = files.iter().find(|f| f.path == "index.html").unwrap();
    assert!(!index.content.contains("data-previewkit-agent"));

    orchestrator.cancel().await;
    runtime.wait_idle().await;
}

#[tokio::test(start_paused = true)]
async fn test_server_exit_after_ready_clears_the_preview() {
    let runtime = FakeRuntime::new();
    runtime.on("npm install", [Script::exit(0)]).on(
        "npm run dev",
        [Script::crash_after(DEV_SERVER_PORT, Duration::from_secs(30), 1)],
    );
    let orchestrator = orchestrator(FakeBooter::new(runtime.clone()));
    let mut events = orchestrator.subscribe();

    orchestrator.submit(vite_project()).await;
    let mut status = orchestrator.status();
    let status = status
        .wait_for(|s| s.phase == BuildPhase::Error)
        .await
        .unwrap()
        .clone();

    assert!(status.preview_url.is_none());
    let failure = status.failure.expect("server exit failure");
    assert_eq!(failure.kind, FailureKind::StartFailure);
    assert_eq!(failure.phase_reached, BuildPhase::Ready);
    assert!(failure.message.contains("exited with code 1"));

    let events = drain(&mut events).await;
    let ready = events
        .iter()
        .position(|e| matches!(e, OrchestratorEvent::PreviewReady { .. }))
        .expect("preview went live first");
    let failed = events
        .iter()
        .position(|e| matches!(e, OrchestratorEvent::Failed { .. }))
        .expect("exit reported");
    assert!(ready < failed);
    assert_eq!(runtime.live_processes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_native_project_never_touches_the_sandbox() {
    let runtime = FakeRuntime::new();
    let booter = FakeBooter::new(runtime.clone());
    let orchestrator = orchestrator(booter.clone());

    orchestrator.submit(native_only_project()).await;
    let status = orchestrator.current_status();

    assert_eq!(
        status.classification,
        Some(ProjectClassification::UnsupportedNative(None))
    );
    let message = status.unsupported.expect("unsupported message");
    assert!(message.contains("native"));
    assert!(message.contains("device or emulator"));
    assert_eq!(status.phase, BuildPhase::Idle);
    assert!(status.failure.is_none());
    assert!(status.preview_url.is_none());
    assert_eq!(booter.boots(), 0);
    assert!(runtime.spawned().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_manifest_project_reaches_ready() {
    let runtime = FakeRuntime::new();
    runtime
        .on("npm install", [Script::exit_with(0, &["added 1 package in 1s"])])
        .on("npm run dev", [Script::serve(DEV_SERVER_PORT)]);
    let orchestrator = orchestrator(FakeBooter::new(runtime.clone()));
    let mut events = orchestrator.subscribe();

    let run_id = orchestrator.submit(vite_project()).await;
    let status = settled(&orchestrator).await;
    assert_eq!(status.run_id, Some(run_id));
    assert_eq!(status.preview_url.as_deref(), Some("http://localhost:5173/"));

    let events = drain(&mut events).await;
    assert_matches!(events.first(), Some(OrchestratorEvent::Classified { .. }));
    assert_eq!(
        phases(&events),
        vec![
            BuildPhase::Mounting,
            BuildPhase::Installing,
            BuildPhase::Starting,
            BuildPhase::Ready
        ]
    );
    assert!(events.iter().any(|e| matches!(
        e,
        OrchestratorEvent::Log { line, .. } if line.text == "added 1 package in 1s"
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        OrchestratorEvent::PreviewReady { port: Some(5173), .. }
    )));
    assert_eq!(orchestrator.current_status().phase, BuildPhase::Ready);

    orchestrator.cancel().await;
    let status = orchestrator.current_status();
    assert_eq!(status.phase, BuildPhase::Idle);
    assert!(status.preview_url.is_none());
    runtime.wait_idle().await;
    assert_eq!(runtime.live_processes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_new_submission_cancels_the_active_run() {
    let runtime = FakeRuntime::new();
    runtime
        .on("npm install", [Script::Hang, Script::exit(0)])
        .on("npm run dev", [Script::serve(DEV_SERVER_PORT)]);
    let orchestrator = orchestrator(FakeBooter::new(runtime.clone()));
    let mut events = orchestrator.subscribe();

    let first = orchestrator.submit(vite_project()).await;
    let mut status = orchestrator.status();
    status.wait_for(|s| s.phase == BuildPhase::Installing).await.unwrap();

    let edit = FileRecord::new("src/App.jsx", "export default function App() { return <h1>v2</h1> }");
    let second = orchestrator.submit(vec![edit]).await;
    assert_ne!(first, second);

    let status = settled(&orchestrator).await;
    assert_eq!(status.run_id, Some(second));
    assert!(status.preview_url.is_some());

    let mounts = runtime.mounts();
    assert_eq!(mounts.len(), 2);
    assert!(mounts[1].contents("src/App.jsx").unwrap().contains("v2"));
    assert!(mounts[1].contents("package.json").is_some());
    assert_eq!(
        runtime.spawned(),
        vec![
            "npm install --no-audit --no-fund",
            "npm install --no-audit --no-fund",
            "npm run dev"
        ]
    );
    // the superseded run ends quietly
    let events = drain(&mut events).await;
    assert!(!events
        .iter()
        .any(|e| matches!(e, OrchestratorEvent::Failed { .. })));

    orchestrator.cancel().await;
    runtime.wait_idle().await;
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_failure_starts_with_fresh_logs() {
    let runtime = FakeRuntime::new();
    runtime
        .on(
            "npm install",
            [
                Script::exit_with(1, &["npm ERR! boom"]),
                Script::exit_with(1, &["npm ERR! boom"]),
                Script::exit(0),
            ],
        )
        .on("npm run dev", [Script::serve(DEV_SERVER_PORT)]);
    let orchestrator = orchestrator(FakeBooter::new(runtime.clone()));
    let mut events = orchestrator.subscribe();

    orchestrator.submit(vite_project()).await;
    let status = settled(&orchestrator).await;
    let failure = status.failure.expect("install failure");
    assert_eq!(failure.kind, FailureKind::InstallFailure);
    assert_eq!(status.phase, BuildPhase::Error);
    assert!(orchestrator.logs().iter().any(|l| l.text.contains("boom")));
    assert!(drain(&mut events)
        .await
        .iter()
        .any(|e| matches!(e, OrchestratorEvent::Failed { .. })));

    orchestrator.retry().await;
    let status = settled(&orchestrator).await;
    assert!(status.failure.is_none());
    assert!(status.preview_url.is_some());
    assert!(!orchestrator.logs().iter().any(|l| l.text.contains("boom")));

    orchestrator.cancel().await;
}

#[tokio::test(start_paused = true)]
async fn test_boot_failure_is_memoized_until_reset() {
    let booter = FakeBooter::failing(BootError::CapabilityUnsupported(
        "cross-origin isolation".to_string(),
    ));
    let orchestrator = orchestrator(booter.clone());

    orchestrator.submit(vite_project()).await;
    let failure = settled(&orchestrator).await.failure.expect("boot failure");
    assert_eq!(failure.kind, FailureKind::CapabilityUnsupported);
    assert_eq!(failure.phase_reached, BuildPhase::Idle);
    assert!(failure.message.contains("cross-origin isolation"));

    orchestrator.retry().await;
    settled(&orchestrator).await;
    assert_eq!(booter.boots(), 1);

    orchestrator.runtime().reset();
    orchestrator.retry().await;
    settled(&orchestrator).await;
    assert_eq!(booter.boots(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_acquires_share_one_boot() {
    let booter = FakeBooter::slow(FakeRuntime::new(), Duration::from_millis(500));
    let handle = Arc::new(RuntimeHandle::new(booter.clone()));

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let handle = handle.clone();
            tokio::spawn(async move { handle.acquire().await.map(|rt| rt.name().to_string()) })
        })
        .collect();
    for task in tasks {
        let name = assert_ok!(assert_ok!(task.await));
        assert_eq!(name, "fake");
    }

    assert_eq!(booter.boots(), 1);
    assert!(handle.try_get().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_replace_files_drops_old_paths() {
    let orchestrator = orchestrator(FakeBooter::new(FakeRuntime::new()));
    orchestrator.submit(native_only_project()).await;
    orchestrator.replace_files(static_site()).await;

    let paths: Vec<String> = orchestrator.files().into_iter().map(|f| f.path).collect();
    assert_eq!(paths, vec!["index.html"]);
    assert_eq!(orchestrator.classification(), Some(ProjectClassification::Static));
}

#[tokio::test(start_paused = true)]
async fn test_display_hints_survive_new_runs() {
    let orchestrator = orchestrator(FakeBooter::new(FakeRuntime::new()));
    let hints = DisplayHints {
        device: Some("iphone-15".to_string()),
        zoom: Some(0.75),
    };
    orchestrator.set_display_hints(hints.clone());
    orchestrator.submit(static_site()).await;
    assert_eq!(orchestrator.current_status().hints, hints);
}
