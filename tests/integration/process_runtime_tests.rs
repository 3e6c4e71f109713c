//! Real child processes on the local process runtime

#![cfg(unix)]

use previewkit_common::{BuildPhase, FileRecord, LogSource, ProjectClassification};
use previewkit_sandbox::{
    BuildOutcome, BuildPipeline, CommandSpec, LogStream, OrchestratorConfig, PhaseLimits,
    ProcessRuntimeBooter, RuntimeBooter, StartConfig, StartStrategy,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

fn shell_config() -> OrchestratorConfig {
    OrchestratorConfig {
        limits: PhaseLimits::strict(),
        install: CommandSpec::new("sh").args(["-c", "echo installed; ls package.json"]),
        start: StartConfig {
            strategies: vec![StartStrategy::new("shell-server", "sh")
                .args(["-c", "echo '  Local:   http://localhost:4173/'; exec sleep 30"])],
            ..StartConfig::default()
        },
        ..OrchestratorConfig::default()
    }
}

#[tokio::test]
async fn test_pipeline_runs_real_processes() {
    let root = tempfile::tempdir().unwrap();
    let booter = ProcessRuntimeBooter::new()
        .with_root(root.path())
        .require_programs(["sh"]);
    let runtime = assert_ok!(booter.boot().await);

    let files = vec![
        FileRecord::new("package.json", r#"{"name":"shell"}"#),
        FileRecord::new("src/index.js", "console.log('hi')"),
    ];
    let cancel = CancellationToken::new();
    let mut pipeline = BuildPipeline::new(
        runtime,
        Arc::new(shell_config()),
        LogStream::new(100),
        cancel.clone(),
    );

    let classification = ProjectClassification::Manifest(String::new());
    let preview = match pipeline.run(&files, &classification).await {
        BuildOutcome::Ready(preview) => preview,
        BuildOutcome::Failed(failure) => panic!("build failed: {:?}", failure),
    };

    assert_eq!(preview.port(), 4173);
    assert_eq!(preview.url(), "http://localhost:4173/");
    assert_eq!(pipeline.phase(), BuildPhase::Ready);
    assert!(root.path().join("src/index.js").is_file());

    let install = pipeline.logs().combined_output(LogSource::Install);
    assert!(install.contains("installed"));
    assert!(install.contains("package.json"));

    cancel.cancel();
    let stopped = tokio::time::timeout(Duration::from_secs(5), pipeline.hold(preview)).await;
    assert_eq!(assert_ok!(stopped), None);
}

#[tokio::test]
async fn test_boot_fails_without_required_program() {
    let booter = ProcessRuntimeBooter::new().require_programs(["previewkit-no-such-tool"]);
    let err = booter.boot().await.err().expect("boot should fail");
    assert!(err.is_fatal());
}
